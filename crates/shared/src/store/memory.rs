//! In-process account store

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AccountFilter, AccountStore, StoreError, StoreResult};
use crate::types::{Account, User};

/// Account store kept entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
    // Vec keeps registration order so the owner is the first user inserted
    users: RwLock<Vec<User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_account(&self, account: Account) {
        self.accounts.write().await.insert(account.id, account);
    }

    pub async fn insert_user(&self, user: User) {
        let mut users = self.users.write().await;
        users.retain(|u| u.id != user.id);
        users.push(user);
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_account(&self, id: Uuid) -> StoreResult<Account> {
        self.accounts
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "account",
                id,
            })
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<User> {
        self.users
            .read()
            .await
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "user", id })
    }

    async fn find_account_owner(&self, account_id: Uuid) -> StoreResult<User> {
        self.users
            .read()
            .await
            .iter()
            .find(|u| u.account_id == account_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "owner of account",
                id: account_id,
            })
    }

    async fn find_accounts(&self, filter: &AccountFilter) -> StoreResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .accounts
            .read()
            .await
            .values()
            .filter(|account| filter.matches(account))
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }

    async fn update_account(&self, account: &Account) -> StoreResult<()> {
        let mut accounts = self.accounts.write().await;
        let stored = accounts.get_mut(&account.id).ok_or(StoreError::NotFound {
            entity: "account",
            id: account.id,
        })?;
        *stored = Account {
            updated_at: OffsetDateTime::now_utc(),
            ..account.clone()
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DateField, DateWindow};
    use time::Duration;

    #[tokio::test]
    async fn test_find_missing_account() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        let err = store.find_account(id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "account", .. }));
    }

    #[tokio::test]
    async fn test_update_persists_customer_id() {
        let store = MemoryStore::new();
        let mut account = Account::new("acme", "Acme Srl");
        store.insert_account(account.clone()).await;

        account.stripe_customer_id = Some("cus_123".to_string());
        store.update_account(&account).await.unwrap();

        let stored = store.find_account(account.id).await.unwrap();
        assert_eq!(stored.billing_customer_id(), Some("cus_123"));
    }

    #[tokio::test]
    async fn test_update_unknown_account_fails() {
        let store = MemoryStore::new();
        let account = Account::new("ghost", "Ghost Ltd");

        let err = store.update_account(&account).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_owner_is_first_registered_user() {
        let store = MemoryStore::new();
        let account = Account::new("acme", "Acme Srl");
        let owner = User::new(account.id, "owner@acme.test", "Ada", "Lovelace");
        let member = User::new(account.id, "member@acme.test", "Alan", "Turing");
        store.insert_account(account.clone()).await;
        store.insert_user(owner.clone()).await;
        store.insert_user(member).await;

        let found = store.find_account_owner(account.id).await.unwrap();
        assert_eq!(found.id, owner.id);
    }

    #[tokio::test]
    async fn test_find_accounts_applies_filter() {
        let store = MemoryStore::new();
        let now = OffsetDateTime::now_utc();

        let mut expiring = Account::new("expiring", "Expiring");
        expiring.trial_period_ends_at = Some(now + Duration::days(2));
        let mut later = Account::new("later", "Later");
        later.trial_period_ends_at = Some(now + Duration::days(5));
        let mut paying = Account::new("paying", "Paying");
        paying.active = true;
        paying.trial_period_ends_at = Some(now + Duration::days(2));

        for account in [expiring.clone(), later, paying] {
            store.insert_account(account).await;
        }

        let filter = AccountFilter::new().active(false).window(DateWindow::new(
            DateField::TrialPeriodEndsAt,
            now,
            now + Duration::days(3),
        ));
        let found = store.find_accounts(&filter).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, expiring.id);
    }
}
