//! Subscription management
//!
//! Maps accounts to Stripe customers and subscriptions. The account's
//! `stripe_customer_id` is the only piece of billing state stored locally;
//! everything else is read from Stripe on every call.

use std::collections::HashMap;
use std::sync::Arc;

use startersaas_shared::{Account, AccountStore, User};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::provider::{
    BillingCard, BillingCustomer, BillingInvoice, BillingProvider, BillingSetupIntent,
    BillingSubscription, NewCustomer, SubscriptionUpdate,
};

/// Build the Stripe customer for an account and its owner
pub fn customer_params(account: &Account, user: &User) -> NewCustomer {
    let metadata = HashMap::from([
        ("companyName".to_string(), account.company_name.clone()),
        (
            "address".to_string(),
            account.company_billing_address.clone(),
        ),
        ("vat".to_string(), account.company_vat.clone()),
        ("subdomain".to_string(), account.subdomain.clone()),
        ("sdi".to_string(), account.company_sdi.clone()),
        ("phone".to_string(), account.company_phone.clone()),
        ("userName".to_string(), user.name.clone()),
        ("userSurname".to_string(), user.surname.clone()),
    ]);

    NewCustomer {
        name: account.company_name.clone(),
        email: user.email.clone(),
        metadata,
    }
}

/// Pick the subscription that counts as "the" active one.
///
/// Most recently created wins; identical timestamps fall back to the larger ID
/// so the result never depends on the order Stripe returns them in.
pub fn select_active_subscription(
    subscriptions: &[BillingSubscription],
) -> Option<&BillingSubscription> {
    subscriptions
        .iter()
        .filter(|s| s.is_active())
        .max_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)))
}

/// Subscription service for managing Stripe customers and subscriptions
pub struct SubscriptionService {
    stripe: Arc<dyn BillingProvider>,
    store: Arc<dyn AccountStore>,
}

impl SubscriptionService {
    pub fn new(stripe: Arc<dyn BillingProvider>, store: Arc<dyn AccountStore>) -> Self {
        Self { stripe, store }
    }

    /// Load an account and its Stripe customer ID, failing if it has none
    async fn billing_account(&self, account_id: Uuid) -> BillingResult<(Account, String)> {
        let account = self.store.find_account(account_id).await?;
        let customer_id = account
            .billing_customer_id()
            .ok_or(BillingError::NotStripeUser)?
            .to_string();
        Ok((account, customer_id))
    }

    /// Create the Stripe customer for a user's account and store its ID
    pub async fn create_customer(&self, user_id: Uuid) -> BillingResult<BillingCustomer> {
        let user = self.store.find_user(user_id).await?;
        let mut account = self.store.find_account(user.account_id).await?;

        let customer = self
            .stripe
            .create_customer(&customer_params(&account, &user))
            .await?;

        account.stripe_customer_id = Some(customer.id.clone());
        if let Err(e) = self.store.update_account(&account).await {
            tracing::error!(
                account_id = %account.id,
                customer_id = %customer.id,
                error = %e,
                "Created Stripe customer but failed to store its ID"
            );
            return Err(e.into());
        }

        tracing::info!(
            account_id = %account.id,
            customer_id = %customer.id,
            "Created Stripe customer"
        );

        Ok(customer)
    }

    /// Put the user's account on `plan_id`.
    ///
    /// An active subscription is switched to the plan in place. Otherwise any
    /// leftover incomplete or unpaid subscriptions are cancelled and a new
    /// `default_incomplete` subscription is created.
    pub async fn subscribe(&self, user_id: Uuid, plan_id: &str) -> BillingResult<BillingSubscription> {
        let user = self.store.find_user(user_id).await?;
        let mut account = self.store.find_account(user.account_id).await?;

        if account.billing_customer_id().is_none() {
            self.create_customer(user_id).await?;
            account = self.store.find_account(user.account_id).await?;
        }
        let customer_id = account
            .billing_customer_id()
            .ok_or(BillingError::NotStripeUser)?;

        let customer = self.stripe.retrieve_customer(customer_id).await?;
        let plan = self.stripe.retrieve_plan(plan_id).await?;

        if let Some(active) = select_active_subscription(&customer.subscriptions) {
            let update = SubscriptionUpdate {
                plan_id: Some(plan.id.clone()),
                item_id: active.item_id.clone(),
                cancel_at_period_end: Some(false),
            };
            let subscription = self.stripe.update_subscription(&active.id, &update).await?;

            tracing::info!(
                account_id = %account.id,
                subscription_id = %subscription.id,
                plan_id = %plan.id,
                "Changed plan of active subscription"
            );

            return Ok(subscription);
        }

        for stale in customer.subscriptions.iter().filter(|s| !s.is_terminal()) {
            if let Err(e) = self.stripe.cancel_subscription(&stale.id).await {
                tracing::warn!(
                    account_id = %account.id,
                    subscription_id = %stale.id,
                    status = %stale.status,
                    error = %e,
                    "Failed to cancel stale subscription"
                );
            }
        }

        let subscription = self
            .stripe
            .create_subscription(&customer.id, &plan.id)
            .await?;

        tracing::info!(
            account_id = %account.id,
            customer_id = %customer.id,
            subscription_id = %subscription.id,
            plan_id = %plan.id,
            "Created subscription"
        );

        Ok(subscription)
    }

    pub async fn get_customer(&self, account_id: Uuid) -> BillingResult<BillingCustomer> {
        let (_, customer_id) = self.billing_account(account_id).await?;
        self.stripe.retrieve_customer(&customer_id).await
    }

    /// All invoices of the account's customer, every page
    pub async fn get_customer_invoices(&self, account_id: Uuid) -> BillingResult<Vec<BillingInvoice>> {
        let (_, customer_id) = self.billing_account(account_id).await?;

        let mut invoices: Vec<BillingInvoice> = Vec::new();
        loop {
            let cursor = invoices.last().map(|invoice| invoice.id.as_str());
            let page = self.stripe.list_invoices(&customer_id, cursor).await?;
            let done = !page.has_more || page.data.is_empty();
            invoices.extend(page.data);
            if done {
                break;
            }
        }

        Ok(invoices)
    }

    /// All card payment methods of the account's customer, every page
    pub async fn get_customer_cards(&self, account_id: Uuid) -> BillingResult<Vec<BillingCard>> {
        let (_, customer_id) = self.billing_account(account_id).await?;

        let mut cards: Vec<BillingCard> = Vec::new();
        loop {
            let cursor = cards.last().map(|card| card.id.as_str());
            let page = self.stripe.list_cards(&customer_id, cursor).await?;
            let done = !page.has_more || page.data.is_empty();
            cards.extend(page.data);
            if done {
                break;
            }
        }

        Ok(cards)
    }

    /// Cancel a subscription at the end of its billing period
    pub async fn cancel_subscription(
        &self,
        account_id: Uuid,
        subscription_id: &str,
    ) -> BillingResult<BillingCustomer> {
        let (account, customer_id) = self.billing_account(account_id).await?;

        let update = SubscriptionUpdate {
            cancel_at_period_end: Some(true),
            ..Default::default()
        };
        self.stripe
            .update_subscription(subscription_id, &update)
            .await?;

        tracing::info!(
            account_id = %account.id,
            subscription_id = %subscription_id,
            "Subscription set to cancel at period end"
        );

        self.stripe.retrieve_customer(&customer_id).await
    }

    pub async fn create_setup_intent(&self, account_id: Uuid) -> BillingResult<BillingSetupIntent> {
        let (_, customer_id) = self.billing_account(account_id).await?;
        self.stripe.create_setup_intent(&customer_id).await
    }

    pub async fn remove_credit_card(
        &self,
        account_id: Uuid,
        card_id: &str,
    ) -> BillingResult<BillingCustomer> {
        let (account, customer_id) = self.billing_account(account_id).await?;

        self.stripe.detach_payment_method(card_id).await?;
        tracing::info!(account_id = %account.id, card_id = %card_id, "Removed card");

        self.stripe.retrieve_customer(&customer_id).await
    }

    pub async fn set_default_credit_card(
        &self,
        account_id: Uuid,
        card_id: &str,
    ) -> BillingResult<BillingCustomer> {
        let (account, customer_id) = self.billing_account(account_id).await?;

        let customer = self
            .stripe
            .set_default_payment_method(&customer_id, card_id)
            .await?;
        tracing::info!(account_id = %account.id, card_id = %card_id, "Set default card");

        Ok(customer)
    }
}
