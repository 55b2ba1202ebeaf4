//! Postgres-backed account store

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{AccountFilter, AccountStore, StoreError, StoreResult};
use crate::types::{Account, User};

const ACCOUNT_COLUMNS: &str = r#"
    id,
    subdomain,
    company_name,
    company_billing_address,
    company_vat,
    company_sdi,
    company_phone,
    stripe_customer_id,
    trial_period_ends_at,
    payment_failed_subscription_ends_at,
    active,
    payment_failed,
    created_at,
    updated_at
"#;

/// Account store over the `accounts` and `users` tables
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_account(&self, id: Uuid) -> StoreResult<Account> {
        let query = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "account",
                id,
            })
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, account_id, email, name, surname FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { entity: "user", id })
    }

    async fn find_account_owner(&self, account_id: Uuid) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, account_id, email, name, surname
            FROM users
            WHERE account_id = $1
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "owner of account",
            id: account_id,
        })
    }

    async fn find_accounts(&self, filter: &AccountFilter) -> StoreResult<Vec<Account>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");
        builder.push(ACCOUNT_COLUMNS);
        builder.push(" FROM accounts WHERE TRUE");

        if let Some(active) = filter.active {
            builder.push(" AND active = ").push_bind(active);
        }
        if let Some(payment_failed) = filter.payment_failed {
            builder.push(" AND payment_failed = ").push_bind(payment_failed);
        }
        if let Some(window) = filter.window {
            // column names come from a closed enum, never from input
            let column = window.field.column();
            builder
                .push(format!(" AND {} > ", column))
                .push_bind(window.after)
                .push(format!(" AND {} < ", column))
                .push_bind(window.before);
        }
        builder.push(" ORDER BY created_at ASC, id ASC");

        let accounts = builder
            .build_query_as::<Account>()
            .fetch_all(&self.pool)
            .await?;

        Ok(accounts)
    }

    async fn update_account(&self, account: &Account) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET subdomain = $2,
                company_name = $3,
                company_billing_address = $4,
                company_vat = $5,
                company_sdi = $6,
                company_phone = $7,
                stripe_customer_id = $8,
                trial_period_ends_at = $9,
                payment_failed_subscription_ends_at = $10,
                active = $11,
                payment_failed = $12,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(&account.subdomain)
        .bind(&account.company_name)
        .bind(&account.company_billing_address)
        .bind(&account.company_vat)
        .bind(&account.company_sdi)
        .bind(&account.company_phone)
        .bind(&account.stripe_customer_id)
        .bind(account.trial_period_ends_at)
        .bind(account.payment_failed_subscription_ends_at)
        .bind(account.active)
        .bind(account.payment_failed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "account",
                id: account.id,
            });
        }

        tracing::debug!(account_id = %account.id, "Updated account");
        Ok(())
    }
}
