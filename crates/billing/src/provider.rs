//! Billing provider seam
//!
//! The facade talks to Stripe only through [`BillingProvider`]. The types here
//! mirror the Stripe fields the application actually reads, so callers never
//! depend on `async-stripe` directly.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::BillingResult;

/// Subscription status Stripe reports for a paid, running subscription
pub const STATUS_ACTIVE: &str = "active";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BillingCustomer {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub metadata: HashMap<String, String>,
    pub default_payment_method: Option<String>,
    pub subscriptions: Vec<BillingSubscription>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BillingSubscription {
    pub id: String,
    pub status: String,
    pub plan_id: Option<String>,
    /// First subscription item; plan changes are applied to it
    pub item_id: Option<String>,
    pub cancel_at_period_end: bool,
    pub created: i64,
    pub current_period_end: i64,
    /// Client secret of the latest invoice's payment intent, when expanded
    pub payment_client_secret: Option<String>,
}

impl BillingSubscription {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    /// Stripe rejects cancellation of subscriptions in these states
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "canceled" | "incomplete_expired")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BillingPlan {
    pub id: String,
    pub nickname: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BillingInvoice {
    pub id: String,
    pub number: Option<String>,
    pub status: Option<String>,
    pub amount_due: Option<i64>,
    pub amount_paid: Option<i64>,
    pub currency: Option<String>,
    pub created: Option<i64>,
    pub hosted_invoice_url: Option<String>,
    pub invoice_pdf: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BillingCard {
    pub id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<i64>,
    pub exp_year: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BillingSetupIntent {
    pub id: String,
    pub customer_id: Option<String>,
    pub client_secret: Option<String>,
}

/// One page of a cursor-paginated list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub has_more: bool,
}

/// Parameters for creating a Stripe customer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    pub metadata: HashMap<String, String>,
}

/// Partial update of a subscription; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    /// Move the subscription item `item_id` to this plan
    pub plan_id: Option<String>,
    pub item_id: Option<String>,
    pub cancel_at_period_end: Option<bool>,
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn create_customer(&self, customer: &NewCustomer) -> BillingResult<BillingCustomer>;

    /// Fetch a customer with its subscriptions
    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<BillingCustomer>;

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> BillingResult<BillingCustomer>;

    async fn retrieve_plan(&self, plan_id: &str) -> BillingResult<BillingPlan>;

    /// Create a `default_incomplete` subscription with the payment intent expanded
    async fn create_subscription(
        &self,
        customer_id: &str,
        plan_id: &str,
    ) -> BillingResult<BillingSubscription>;

    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: &SubscriptionUpdate,
    ) -> BillingResult<BillingSubscription>;

    /// Cancel immediately
    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<BillingSubscription>;

    async fn list_invoices(
        &self,
        customer_id: &str,
        starting_after: Option<&str>,
    ) -> BillingResult<Page<BillingInvoice>>;

    async fn list_cards(
        &self,
        customer_id: &str,
        starting_after: Option<&str>,
    ) -> BillingResult<Page<BillingCard>>;

    async fn detach_payment_method(&self, payment_method_id: &str) -> BillingResult<()>;

    /// Create a setup intent for card payment methods
    async fn create_setup_intent(&self, customer_id: &str) -> BillingResult<BillingSetupIntent>;
}
