// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries StoreError which wraps sqlx::Error
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! StarterSaaS Billing Module
//!
//! Keeps accounts in sync with Stripe customers and runs the billing
//! notification sweeps.
//!
//! ## Features
//!
//! - **Customers**: Create the Stripe customer for an account and store its ID
//! - **Subscriptions**: Subscribe, switch plan, cancel at period end
//! - **Payment Methods**: List, remove and set the default card; setup intents
//! - **Invoices**: Full invoice history for an account
//! - **Email Notifications**: Trial expiring, payment failed

pub mod client;
pub mod email;
pub mod error;
pub mod notifications;
pub mod provider;
pub mod subscriptions;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use startersaas_shared::AccountStore;

// Client
pub use client::{StripeClient, StripeConfig};

// Email
pub use email::{BillingEmailService, EmailConfig, NotificationSender};

// Error
pub use error::{BillingError, BillingResult};

// Notifications
pub use notifications::{
    Notification, NotificationConfig, NotificationDispatcher, NotificationService, SweepSummary,
};

// Provider
pub use provider::{
    BillingCard, BillingCustomer, BillingInvoice, BillingPlan, BillingProvider,
    BillingSetupIntent, BillingSubscription, Page,
};

// Subscriptions
pub use subscriptions::SubscriptionService;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub subscriptions: SubscriptionService,
    pub notifications: NotificationService,
}

impl BillingService {
    /// Create a new billing service from environment variables.
    ///
    /// Spawns the notification dispatcher, so this must run inside a Tokio runtime.
    pub fn from_env(store: Arc<dyn AccountStore>) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        let email_service = BillingEmailService::from_env();

        Ok(Self::new(
            Arc::new(stripe),
            store,
            Arc::new(email_service),
            NotificationConfig::from_env(),
        ))
    }

    /// Create a new billing service with explicit collaborators
    pub fn new(
        stripe: Arc<dyn BillingProvider>,
        store: Arc<dyn AccountStore>,
        email: Arc<dyn NotificationSender>,
        config: NotificationConfig,
    ) -> Self {
        let dispatcher = NotificationDispatcher::spawn(email, config.queue_capacity);

        Self {
            subscriptions: SubscriptionService::new(stripe, store.clone()),
            notifications: NotificationService::new(store, dispatcher, config),
        }
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        self.notifications.dispatcher()
    }
}
