//! Account/user storage
//!
//! The billing facade only needs lookups by ID, the owner of an account,
//! filtered account queries for the notification sweeps, and a single
//! account update. [`PgAccountStore`] backs this with Postgres,
//! [`MemoryStore`] keeps everything in process.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgAccountStore;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::types::{Account, User};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Timestamp columns the sweeps filter on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    TrialPeriodEndsAt,
    PaymentFailedSubscriptionEndsAt,
}

impl DateField {
    pub fn column(&self) -> &'static str {
        match self {
            DateField::TrialPeriodEndsAt => "trial_period_ends_at",
            DateField::PaymentFailedSubscriptionEndsAt => "payment_failed_subscription_ends_at",
        }
    }

    pub fn value(&self, account: &Account) -> Option<OffsetDateTime> {
        match self {
            DateField::TrialPeriodEndsAt => account.trial_period_ends_at,
            DateField::PaymentFailedSubscriptionEndsAt => {
                account.payment_failed_subscription_ends_at
            }
        }
    }
}

/// Open interval on a timestamp column: `after < field < before`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub field: DateField,
    pub after: OffsetDateTime,
    pub before: OffsetDateTime,
}

impl DateWindow {
    pub fn new(field: DateField, after: OffsetDateTime, before: OffsetDateTime) -> Self {
        Self {
            field,
            after,
            before,
        }
    }

    pub fn contains(&self, account: &Account) -> bool {
        self.field
            .value(account)
            .is_some_and(|ts| ts > self.after && ts < self.before)
    }
}

/// Predicate for [`AccountStore::find_accounts`]. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountFilter {
    pub active: Option<bool>,
    pub payment_failed: Option<bool>,
    pub window: Option<DateWindow>,
}

impl AccountFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn payment_failed(mut self, payment_failed: bool) -> Self {
        self.payment_failed = Some(payment_failed);
        self
    }

    pub fn window(mut self, window: DateWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn matches(&self, account: &Account) -> bool {
        self.active.is_none_or(|active| account.active == active)
            && self
                .payment_failed
                .is_none_or(|failed| account.payment_failed == failed)
            && self.window.is_none_or(|window| window.contains(account))
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account(&self, id: Uuid) -> StoreResult<Account>;

    async fn find_user(&self, id: Uuid) -> StoreResult<User>;

    /// The first user registered on the account
    async fn find_account_owner(&self, account_id: Uuid) -> StoreResult<User>;

    async fn find_accounts(&self, filter: &AccountFilter) -> StoreResult<Vec<Account>>;

    async fn update_account(&self, account: &Account) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn trial_account(active: bool, ends_in: Duration) -> Account {
        let mut account = Account::new("acme", "Acme Srl");
        account.active = active;
        account.trial_period_ends_at = Some(OffsetDateTime::now_utc() + ends_in);
        account
    }

    #[test]
    fn test_window_bounds_are_exclusive() {
        let now = OffsetDateTime::now_utc();
        let window = DateWindow::new(DateField::TrialPeriodEndsAt, now, now + Duration::days(3));

        let mut account = Account::new("acme", "Acme Srl");
        account.trial_period_ends_at = Some(now);
        assert!(!window.contains(&account));

        account.trial_period_ends_at = Some(now + Duration::days(3));
        assert!(!window.contains(&account));

        account.trial_period_ends_at = Some(now + Duration::hours(1));
        assert!(window.contains(&account));

        account.trial_period_ends_at = None;
        assert!(!window.contains(&account));
    }

    #[test]
    fn test_filter_combines_predicates() {
        let now = OffsetDateTime::now_utc();
        let filter = AccountFilter::new().active(false).window(DateWindow::new(
            DateField::TrialPeriodEndsAt,
            now,
            now + Duration::days(3),
        ));

        assert!(filter.matches(&trial_account(false, Duration::days(1))));
        assert!(!filter.matches(&trial_account(true, Duration::days(1))));
        assert!(!filter.matches(&trial_account(false, Duration::days(4))));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = AccountFilter::new();
        assert!(filter.matches(&Account::new("acme", "Acme Srl")));
        assert!(filter.matches(&trial_account(true, Duration::days(10))));
    }
}
