//! Stripe client configuration and the `async-stripe` backed provider

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use stripe::generated::billing::subscription::SubscriptionPaymentBehavior;
use stripe::{
    CancelSubscription, CreateCustomer, CreateSetupIntent, CreateSubscription,
    CreateSubscriptionItems, Customer, CustomerId, CustomerInvoiceSettings, Expandable, Invoice,
    InvoiceId, ListInvoices, ListPaymentMethods, PaymentMethod, PaymentMethodId,
    PaymentMethodTypeFilter, Plan, PlanId, SetupIntent, Subscription, SubscriptionId,
    SubscriptionStatus as StripeSubStatus, UpdateCustomer, UpdateSubscription,
    UpdateSubscriptionItems,
};

use crate::error::{BillingError, BillingResult};
use crate::provider::{
    BillingCard, BillingCustomer, BillingInvoice, BillingPlan, BillingProvider,
    BillingSetupIntent, BillingSubscription, NewCustomer, Page, SubscriptionUpdate,
};

/// Page size for list endpoints (Stripe maximum)
const PAGE_SIZE: u64 = 100;

/// Expansions that keep `BillingCustomer::subscriptions` populated
const CUSTOMER_EXPAND: &[&str] = &["subscriptions"];

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    /// Override for the Stripe API host (stripe-mock, proxies)
    pub api_base_url: Option<String>,
}

impl fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

impl StripeConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            api_base_url: None,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;

        Ok(Self {
            secret_key,
            api_base_url: std::env::var("STRIPE_API_BASE_URL").ok(),
        })
    }
}

/// Stripe API client. Owns its key; nothing is set process-wide.
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = match config.api_base_url.as_deref() {
            Some(url) => stripe::Client::from_url(url, config.secret_key.clone()),
            None => stripe::Client::new(config.secret_key.clone()),
        };
        Self { inner, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

fn parse_id<T>(raw: &str, kind: &str) -> BillingResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| BillingError::StripeApi(format!("Invalid {} ID: {}", kind, e)))
}

fn subscription_status(status: &StripeSubStatus) -> &'static str {
    match status {
        StripeSubStatus::Active => "active",
        StripeSubStatus::PastDue => "past_due",
        StripeSubStatus::Canceled => "canceled",
        StripeSubStatus::Unpaid => "unpaid",
        StripeSubStatus::Trialing => "trialing",
        StripeSubStatus::Incomplete => "incomplete",
        StripeSubStatus::IncompleteExpired => "incomplete_expired",
        StripeSubStatus::Paused => "paused",
    }
}

fn map_customer(customer: Customer) -> BillingCustomer {
    let default_payment_method = customer
        .invoice_settings
        .and_then(|settings| settings.default_payment_method)
        .map(|pm| match pm {
            Expandable::Id(id) => id.to_string(),
            Expandable::Object(pm) => pm.id.to_string(),
        });

    BillingCustomer {
        id: customer.id.to_string(),
        email: customer.email,
        name: customer.name,
        metadata: customer.metadata.unwrap_or_default(),
        default_payment_method,
        subscriptions: customer
            .subscriptions
            .map(|list| list.data.into_iter().map(map_subscription).collect())
            .unwrap_or_default(),
    }
}

fn map_subscription(subscription: Subscription) -> BillingSubscription {
    let item = subscription.items.data.first();

    let payment_client_secret = match &subscription.latest_invoice {
        Some(Expandable::Object(invoice)) => match &invoice.payment_intent {
            Some(Expandable::Object(intent)) => intent.client_secret.clone(),
            _ => None,
        },
        _ => None,
    };

    BillingSubscription {
        id: subscription.id.to_string(),
        status: subscription_status(&subscription.status).to_string(),
        plan_id: item
            .and_then(|item| item.plan.as_ref())
            .map(|plan| plan.id.to_string()),
        item_id: item.map(|item| item.id.to_string()),
        cancel_at_period_end: subscription.cancel_at_period_end,
        created: subscription.created,
        current_period_end: subscription.current_period_end,
        payment_client_secret,
    }
}

fn map_plan(plan: Plan) -> BillingPlan {
    BillingPlan {
        id: plan.id.to_string(),
        nickname: plan.nickname,
        amount: plan.amount,
        currency: plan.currency.map(|c| c.to_string()),
        interval: plan.interval.map(|i| i.as_str().to_string()),
    }
}

fn map_invoice(invoice: Invoice) -> BillingInvoice {
    BillingInvoice {
        id: invoice.id.to_string(),
        number: invoice.number,
        status: invoice.status.map(|s| s.as_str().to_string()),
        amount_due: invoice.amount_due,
        amount_paid: invoice.amount_paid,
        currency: invoice.currency.map(|c| c.to_string()),
        created: invoice.created,
        hosted_invoice_url: invoice.hosted_invoice_url,
        invoice_pdf: invoice.invoice_pdf,
    }
}

fn map_card(pm: PaymentMethod) -> BillingCard {
    let card = pm.card.as_ref();
    BillingCard {
        id: pm.id.to_string(),
        brand: card.map(|c| c.brand.to_string()),
        last4: card.map(|c| c.last4.clone()),
        exp_month: card.map(|c| c.exp_month),
        exp_year: card.map(|c| c.exp_year),
    }
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn create_customer(&self, customer: &NewCustomer) -> BillingResult<BillingCustomer> {
        let params = CreateCustomer {
            name: Some(customer.name.as_str()),
            email: Some(customer.email.as_str()),
            metadata: Some(customer.metadata.clone()),
            ..Default::default()
        };

        let created = Customer::create(&self.inner, params).await?;
        Ok(map_customer(created))
    }

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<BillingCustomer> {
        let customer_id = parse_id::<CustomerId>(customer_id, "customer")?;
        let customer = Customer::retrieve(&self.inner, &customer_id, CUSTOMER_EXPAND).await?;
        Ok(map_customer(customer))
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> BillingResult<BillingCustomer> {
        let customer_id = parse_id::<CustomerId>(customer_id, "customer")?;
        let pm_id = parse_id::<PaymentMethodId>(payment_method_id, "payment method")?;

        let mut params = UpdateCustomer::new();
        params.invoice_settings = Some(CustomerInvoiceSettings {
            default_payment_method: Some(pm_id.to_string()),
            ..Default::default()
        });
        params.expand = CUSTOMER_EXPAND;

        let customer = Customer::update(&self.inner, &customer_id, params).await?;
        Ok(map_customer(customer))
    }

    async fn retrieve_plan(&self, plan_id: &str) -> BillingResult<BillingPlan> {
        let plan_id = parse_id::<PlanId>(plan_id, "plan")?;
        let plan = Plan::retrieve(&self.inner, &plan_id, &[]).await?;
        Ok(map_plan(plan))
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        plan_id: &str,
    ) -> BillingResult<BillingSubscription> {
        let customer_id = parse_id::<CustomerId>(customer_id, "customer")?;

        // Legacy plan IDs are accepted wherever a price ID is
        let mut params = CreateSubscription::new(customer_id);
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(plan_id.to_string()),
            ..Default::default()
        }]);
        params.payment_behavior = Some(SubscriptionPaymentBehavior::DefaultIncomplete);
        params.expand = &["latest_invoice.payment_intent"];

        let subscription = Subscription::create(&self.inner, params).await?;
        Ok(map_subscription(subscription))
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: &SubscriptionUpdate,
    ) -> BillingResult<BillingSubscription> {
        let sub_id = parse_id::<SubscriptionId>(subscription_id, "subscription")?;

        let params = UpdateSubscription {
            cancel_at_period_end: update.cancel_at_period_end,
            items: update.plan_id.as_ref().map(|plan_id| {
                vec![UpdateSubscriptionItems {
                    id: update.item_id.clone(),
                    price: Some(plan_id.clone()),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        };

        let subscription = Subscription::update(&self.inner, &sub_id, params).await?;
        Ok(map_subscription(subscription))
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<BillingSubscription> {
        let sub_id = parse_id::<SubscriptionId>(subscription_id, "subscription")?;

        let params = CancelSubscription {
            cancellation_details: None,
            invoice_now: None,
            prorate: None,
        };

        let subscription = Subscription::cancel(&self.inner, &sub_id, params).await?;
        Ok(map_subscription(subscription))
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        starting_after: Option<&str>,
    ) -> BillingResult<Page<BillingInvoice>> {
        let mut params = ListInvoices::new();
        params.customer = Some(parse_id::<CustomerId>(customer_id, "customer")?);
        params.limit = Some(PAGE_SIZE);
        params.starting_after = starting_after
            .map(|id| parse_id::<InvoiceId>(id, "invoice"))
            .transpose()?;

        let list = Invoice::list(&self.inner, &params).await?;
        Ok(Page {
            data: list.data.into_iter().map(map_invoice).collect(),
            has_more: list.has_more,
        })
    }

    async fn list_cards(
        &self,
        customer_id: &str,
        starting_after: Option<&str>,
    ) -> BillingResult<Page<BillingCard>> {
        let mut params = ListPaymentMethods::new();
        params.customer = Some(parse_id::<CustomerId>(customer_id, "customer")?);
        params.type_ = Some(PaymentMethodTypeFilter::Card);
        params.limit = Some(PAGE_SIZE);
        params.starting_after = starting_after
            .map(|id| parse_id::<PaymentMethodId>(id, "payment method"))
            .transpose()?;

        let list = PaymentMethod::list(&self.inner, &params).await?;
        Ok(Page {
            data: list.data.into_iter().map(map_card).collect(),
            has_more: list.has_more,
        })
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> BillingResult<()> {
        let pm_id = parse_id::<PaymentMethodId>(payment_method_id, "payment method")?;
        PaymentMethod::detach(&self.inner, &pm_id).await?;
        Ok(())
    }

    async fn create_setup_intent(&self, customer_id: &str) -> BillingResult<BillingSetupIntent> {
        let mut params = CreateSetupIntent::new();
        params.customer = Some(parse_id::<CustomerId>(customer_id, "customer")?);
        params.payment_method_types = Some(vec!["card".to_string()]);

        let intent = SetupIntent::create(&self.inner, params).await?;
        Ok(BillingSetupIntent {
            id: intent.id.to_string(),
            customer_id: intent.customer.map(|c| match c {
                Expandable::Id(id) => id.to_string(),
                Expandable::Object(customer) => customer.id.to_string(),
            }),
            client_secret: intent.client_secret,
        })
    }
}
