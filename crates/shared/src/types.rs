//! Account and user records

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A tenant of the application. Owns the billing identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub subdomain: String,
    pub company_name: String,
    pub company_billing_address: String,
    pub company_vat: String,
    pub company_sdi: String,
    pub company_phone: String,
    /// Foreign key into Stripe's customer namespace
    pub stripe_customer_id: Option<String>,
    pub trial_period_ends_at: Option<OffsetDateTime>,
    pub payment_failed_subscription_ends_at: Option<OffsetDateTime>,
    pub active: bool,
    pub payment_failed: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Account {
    /// Create a fresh account in trial with no billing identity
    pub fn new(subdomain: &str, company_name: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            subdomain: subdomain.to_string(),
            company_name: company_name.to_string(),
            company_billing_address: String::new(),
            company_vat: String::new(),
            company_sdi: String::new(),
            company_phone: String::new(),
            stripe_customer_id: None,
            trial_period_ends_at: None,
            payment_failed_subscription_ends_at: None,
            active: false,
            payment_failed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// The Stripe customer ID, if one has been created.
    ///
    /// An empty string is treated the same as a missing ID.
    pub fn billing_customer_id(&self) -> Option<&str> {
        self.stripe_customer_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

/// A login belonging to exactly one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub account_id: Uuid,
    pub email: String,
    pub name: String,
    pub surname: String,
}

impl User {
    pub fn new(account_id: Uuid, email: &str, name: &str, surname: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            email: email.to_string(),
            name: name.to_string(),
            surname: surname.to_string(),
        }
    }
}
