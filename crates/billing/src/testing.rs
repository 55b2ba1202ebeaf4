//! In-memory provider and sender for tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::email::NotificationSender;
use crate::error::{BillingError, BillingResult};
use crate::provider::{
    BillingCard, BillingCustomer, BillingInvoice, BillingPlan, BillingProvider,
    BillingSetupIntent, BillingSubscription, NewCustomer, Page, SubscriptionUpdate,
};

/// Every provider call, in the order it was made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    CreateCustomer { email: String },
    RetrieveCustomer(String),
    SetDefaultPaymentMethod { customer: String, card: String },
    RetrievePlan(String),
    CreateSubscription { customer: String, plan: String },
    UpdateSubscription { id: String, update: SubscriptionUpdate },
    CancelSubscription(String),
    ListInvoices { cursor: Option<String> },
    ListCards { cursor: Option<String> },
    DetachPaymentMethod(String),
    CreateSetupIntent(String),
}

#[derive(Default)]
struct FakeState {
    customers: HashMap<String, BillingCustomer>,
    invoices: HashMap<String, Vec<BillingInvoice>>,
    cards: HashMap<String, Vec<BillingCard>>,
    calls: Vec<ProviderCall>,
    next_id: u64,
    fail_create_customer: bool,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{:04}", prefix, self.next_id)
    }

    fn customer_mut(&mut self, customer_id: &str) -> BillingResult<&mut BillingCustomer> {
        self.customers
            .get_mut(customer_id)
            .ok_or_else(|| BillingError::StripeApi(format!("No such customer: {}", customer_id)))
    }
}

fn page_of<T: Clone>(
    items: &[T],
    id_of: impl Fn(&T) -> &str,
    cursor: Option<&str>,
    page_size: usize,
) -> Page<T> {
    let start = cursor
        .and_then(|c| items.iter().position(|item| id_of(item) == c))
        .map(|idx| idx + 1)
        .unwrap_or(0);
    let data: Vec<T> = items.iter().skip(start).take(page_size).cloned().collect();
    Page {
        has_more: start + data.len() < items.len(),
        data,
    }
}

/// Stripe stand-in that keeps customers in memory and records every call
pub struct FakeProvider {
    state: Mutex<FakeState>,
    page_size: usize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::with_page_size(10)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            page_size,
        }
    }

    pub fn add_customer(&self, customer: BillingCustomer) {
        let mut state = self.state.lock().unwrap();
        state.customers.insert(customer.id.clone(), customer);
    }

    pub fn add_subscription(&self, customer_id: &str, subscription: BillingSubscription) {
        let mut state = self.state.lock().unwrap();
        state
            .customers
            .get_mut(customer_id)
            .expect("customer exists")
            .subscriptions
            .push(subscription);
    }

    pub fn set_invoices(&self, customer_id: &str, invoices: Vec<BillingInvoice>) {
        let mut state = self.state.lock().unwrap();
        state.invoices.insert(customer_id.to_string(), invoices);
    }

    pub fn set_cards(&self, customer_id: &str, cards: Vec<BillingCard>) {
        let mut state = self.state.lock().unwrap();
        state.cards.insert(customer_id.to_string(), cards);
    }

    pub fn fail_create_customer(&self) {
        self.state.lock().unwrap().fail_create_customer = true;
    }

    pub fn customer(&self, customer_id: &str) -> Option<BillingCustomer> {
        self.state.lock().unwrap().customers.get(customer_id).cloned()
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&ProviderCall) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: ProviderCall) -> std::sync::MutexGuard<'_, FakeState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

#[async_trait]
impl BillingProvider for FakeProvider {
    async fn create_customer(&self, customer: &NewCustomer) -> BillingResult<BillingCustomer> {
        let mut state = self.record(ProviderCall::CreateCustomer {
            email: customer.email.clone(),
        });
        if state.fail_create_customer {
            return Err(BillingError::StripeApi("card_declined".to_string()));
        }

        let created = BillingCustomer {
            id: state.next_id("cus"),
            email: Some(customer.email.clone()),
            name: Some(customer.name.clone()),
            metadata: customer.metadata.clone(),
            ..Default::default()
        };
        state.customers.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<BillingCustomer> {
        let mut state = self.record(ProviderCall::RetrieveCustomer(customer_id.to_string()));
        let customer = state.customer_mut(customer_id)?.clone();
        Ok(customer)
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> BillingResult<BillingCustomer> {
        let mut state = self.record(ProviderCall::SetDefaultPaymentMethod {
            customer: customer_id.to_string(),
            card: payment_method_id.to_string(),
        });
        let customer = state.customer_mut(customer_id)?;
        customer.default_payment_method = Some(payment_method_id.to_string());
        Ok(customer.clone())
    }

    async fn retrieve_plan(&self, plan_id: &str) -> BillingResult<BillingPlan> {
        let _state = self.record(ProviderCall::RetrievePlan(plan_id.to_string()));
        Ok(BillingPlan {
            id: plan_id.to_string(),
            nickname: Some(plan_id.to_uppercase()),
            amount: Some(1900),
            currency: Some("eur".to_string()),
            interval: Some("month".to_string()),
        })
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        plan_id: &str,
    ) -> BillingResult<BillingSubscription> {
        let mut state = self.record(ProviderCall::CreateSubscription {
            customer: customer_id.to_string(),
            plan: plan_id.to_string(),
        });
        let id = state.next_id("sub");
        let item_id = state.next_id("si");
        let subscription = BillingSubscription {
            payment_client_secret: Some(format!("pi_{}_secret", id)),
            id,
            status: "incomplete".to_string(),
            plan_id: Some(plan_id.to_string()),
            item_id: Some(item_id),
            ..Default::default()
        };
        state
            .customer_mut(customer_id)?
            .subscriptions
            .push(subscription.clone());
        Ok(subscription)
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: &SubscriptionUpdate,
    ) -> BillingResult<BillingSubscription> {
        let mut state = self.record(ProviderCall::UpdateSubscription {
            id: subscription_id.to_string(),
            update: update.clone(),
        });
        let subscription = state
            .customers
            .values_mut()
            .flat_map(|c| c.subscriptions.iter_mut())
            .find(|s| s.id == subscription_id)
            .ok_or_else(|| {
                BillingError::StripeApi(format!("No such subscription: {}", subscription_id))
            })?;
        if let Some(plan_id) = &update.plan_id {
            subscription.plan_id = Some(plan_id.clone());
        }
        if let Some(cancel) = update.cancel_at_period_end {
            subscription.cancel_at_period_end = cancel;
        }
        Ok(subscription.clone())
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<BillingSubscription> {
        let mut state = self.record(ProviderCall::CancelSubscription(
            subscription_id.to_string(),
        ));
        let subscription = state
            .customers
            .values_mut()
            .flat_map(|c| c.subscriptions.iter_mut())
            .find(|s| s.id == subscription_id)
            .ok_or_else(|| {
                BillingError::StripeApi(format!("No such subscription: {}", subscription_id))
            })?;
        subscription.status = "canceled".to_string();
        Ok(subscription.clone())
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        starting_after: Option<&str>,
    ) -> BillingResult<Page<BillingInvoice>> {
        let state = self.record(ProviderCall::ListInvoices {
            cursor: starting_after.map(str::to_string),
        });
        let invoices = state.invoices.get(customer_id).cloned().unwrap_or_default();
        Ok(page_of(
            &invoices,
            |i| i.id.as_str(),
            starting_after,
            self.page_size,
        ))
    }

    async fn list_cards(
        &self,
        customer_id: &str,
        starting_after: Option<&str>,
    ) -> BillingResult<Page<BillingCard>> {
        let state = self.record(ProviderCall::ListCards {
            cursor: starting_after.map(str::to_string),
        });
        let cards = state.cards.get(customer_id).cloned().unwrap_or_default();
        Ok(page_of(
            &cards,
            |c| c.id.as_str(),
            starting_after,
            self.page_size,
        ))
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> BillingResult<()> {
        let mut state = self.record(ProviderCall::DetachPaymentMethod(
            payment_method_id.to_string(),
        ));
        let mut found = false;
        for cards in state.cards.values_mut() {
            let before = cards.len();
            cards.retain(|c| c.id != payment_method_id);
            found |= cards.len() != before;
        }
        if !found {
            return Err(BillingError::StripeApi(format!(
                "No such PaymentMethod: {}",
                payment_method_id
            )));
        }
        Ok(())
    }

    async fn create_setup_intent(&self, customer_id: &str) -> BillingResult<BillingSetupIntent> {
        let mut state = self.record(ProviderCall::CreateSetupIntent(customer_id.to_string()));
        let id = state.next_id("seti");
        Ok(BillingSetupIntent {
            client_secret: Some(format!("{}_secret", id)),
            id,
            customer_id: Some(customer_id.to_string()),
        })
    }
}

/// Sender that keeps every email it is asked to deliver
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String, String)>>,
    fail: bool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// (to, subject, body) of every accepted email
    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> BillingResult<()> {
        if self.fail {
            return Err(BillingError::Email("smtp unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}
