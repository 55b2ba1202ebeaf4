//! Billing errors

use startersaas_shared::StoreError;

/// Error message callers see when an account has no Stripe customer yet
pub const NOT_STRIPE_USER: &str = "user is not a stripe USER";

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// The account has no billing identity; no Stripe call was made
    #[error("user is not a stripe USER")]
    NotStripeUser,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Email delivery failed: {0}")]
    Email(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
