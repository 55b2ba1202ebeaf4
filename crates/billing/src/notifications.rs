//! Scheduled notification sweeps
//!
//! Two sweeps look for accounts whose trial or payment-failure grace period
//! ends within the configured window and queue one email per account. Sweeps
//! never wait for delivery: emails go through a [`NotificationDispatcher`],
//! a bounded queue drained by a single background task that logs and counts
//! failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use startersaas_shared::{Account, AccountFilter, AccountStore, DateField, DateWindow};
use time::{Duration, OffsetDateTime};
use tokio::sync::{mpsc, oneshot};

use crate::email::NotificationSender;
use crate::error::BillingResult;

const DEFAULT_APP_NAME: &str = "Starter SAAS";
const DEFAULT_WINDOW_DAYS: i64 = 3;
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Sweep configuration
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Product name used as the subject prefix
    pub app_name: String,
    /// Accounts whose deadline falls within this many days are notified
    pub window_days: i64,
    pub queue_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            window_days: DEFAULT_WINDOW_DAYS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl NotificationConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: std::env::var("NOTIFICATION_APP_NAME")
                .unwrap_or_else(|_| DEFAULT_APP_NAME.to_string()),
            window_days: std::env::var("NOTIFICATION_WINDOW_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|days| *days > 0)
                .unwrap_or(DEFAULT_WINDOW_DAYS),
            queue_capacity: std::env::var("NOTIFICATION_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|capacity| *capacity > 0)
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
        }
    }
}

/// A single queued email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

enum Job {
    Send(Notification),
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct DispatchStats {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Bounded email queue with one delivery task
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Job>,
    stats: Arc<DispatchStats>,
}

impl NotificationDispatcher {
    /// Start the delivery task. Must be called inside a Tokio runtime.
    pub fn spawn(sender: Arc<dyn NotificationSender>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let stats = Arc::new(DispatchStats::default());
        let worker_stats = stats.clone();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Send(notification) => {
                        match sender
                            .send(&notification.to, &notification.subject, &notification.body)
                            .await
                        {
                            Ok(()) => {
                                worker_stats.delivered.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                worker_stats.failed.fetch_add(1, Ordering::Relaxed);
                                tracing::error!(
                                    to = %notification.to,
                                    subject = %notification.subject,
                                    error = %e,
                                    "Failed to deliver notification email"
                                );
                            }
                        }
                    }
                    Job::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            tracing::debug!("Notification dispatcher stopped");
        });

        Self { tx, stats }
    }

    /// Queue a notification without waiting. Returns false if it was dropped.
    pub fn enqueue(&self, notification: Notification) -> bool {
        match self.tx.try_send(Job::Send(notification)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(Job::Send(n))) => {
                tracing::warn!(to = %n.to, subject = %n.subject, "Notification queue full, dropping email");
                false
            }
            Err(_) => {
                tracing::error!("Notification dispatcher is not running");
                false
            }
        }
    }

    /// Wait until everything queued before this call has been attempted
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Job::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn delivered(&self) -> u64 {
        self.stats.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    /// Accounts returned by the query
    pub matched: usize,
    /// Emails handed to the dispatcher
    pub queued: usize,
    /// Accounts with no owner, no deadline, or a full queue
    pub skipped: usize,
}

/// Whole days between `now` and `ends_at`, truncated
pub fn days_until(now: OffsetDateTime, ends_at: OffsetDateTime) -> i64 {
    (ends_at - now).whole_days()
}

/// Format a date as `DD/MM/YYYY`
pub fn format_day_month_year(date: OffsetDateTime) -> String {
    format!(
        "{:02}/{:02}/{:04}",
        date.day(),
        u8::from(date.month()),
        date.year()
    )
}

pub fn trial_expiring_message(app_name: &str, days: i64) -> (String, String) {
    (
        format!("[{}] Trial version is expiring in {} days.", app_name, days),
        format!(
            "Dear user, your trial period is expiring in {} days. Please login and subscribe to a plan.",
            days
        ),
    )
}

pub fn payment_failed_message(app_name: &str, days: i64, ends_at: OffsetDateTime) -> (String, String) {
    (
        format!(
            "[{}] Subscription will be deactivated in {} days.",
            app_name, days
        ),
        format!(
            "Dear user, due to a failed payment your subscription will be deactivated on {}. Please login and check your credit card.",
            format_day_month_year(ends_at)
        ),
    )
}

#[derive(Clone, Copy)]
enum Sweep {
    ExpiringTrials,
    PaymentFailed,
}

impl Sweep {
    fn name(&self) -> &'static str {
        match self {
            Sweep::ExpiringTrials => "expiring_trials",
            Sweep::PaymentFailed => "payment_failed",
        }
    }

    fn field(&self) -> DateField {
        match self {
            Sweep::ExpiringTrials => DateField::TrialPeriodEndsAt,
            Sweep::PaymentFailed => DateField::PaymentFailedSubscriptionEndsAt,
        }
    }

    fn filter(&self, window: DateWindow) -> AccountFilter {
        match self {
            Sweep::ExpiringTrials => AccountFilter::new().active(false).window(window),
            Sweep::PaymentFailed => AccountFilter::new()
                .active(true)
                .payment_failed(true)
                .window(window),
        }
    }
}

/// Runs the trial-expiry and payment-failure sweeps
pub struct NotificationService {
    store: Arc<dyn AccountStore>,
    dispatcher: NotificationDispatcher,
    config: NotificationConfig,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        dispatcher: NotificationDispatcher,
        config: NotificationConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Notify inactive accounts whose trial ends within the window
    pub async fn run_notify_expiring_trials(&self) -> BillingResult<SweepSummary> {
        self.run_notify_expiring_trials_at(OffsetDateTime::now_utc())
            .await
    }

    pub async fn run_notify_expiring_trials_at(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<SweepSummary> {
        self.run(Sweep::ExpiringTrials, now).await
    }

    /// Notify active accounts with a failed payment whose subscription ends within the window
    pub async fn run_notify_payment_failed(&self) -> BillingResult<SweepSummary> {
        self.run_notify_payment_failed_at(OffsetDateTime::now_utc())
            .await
    }

    pub async fn run_notify_payment_failed_at(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<SweepSummary> {
        self.run(Sweep::PaymentFailed, now).await
    }

    async fn run(&self, sweep: Sweep, now: OffsetDateTime) -> BillingResult<SweepSummary> {
        let window = DateWindow::new(
            sweep.field(),
            now,
            now + Duration::days(self.config.window_days),
        );
        let accounts = self.store.find_accounts(&sweep.filter(window)).await?;

        let mut summary = SweepSummary {
            matched: accounts.len(),
            ..Default::default()
        };

        for account in accounts {
            let queued = match self.notification_for(sweep, &account, now).await {
                Some(notification) => self.dispatcher.enqueue(notification),
                None => false,
            };
            if queued {
                summary.queued += 1;
            } else {
                summary.skipped += 1;
            }
        }

        tracing::info!(
            sweep = sweep.name(),
            matched = summary.matched,
            queued = summary.queued,
            skipped = summary.skipped,
            "Notification sweep complete"
        );

        Ok(summary)
    }

    async fn notification_for(
        &self,
        sweep: Sweep,
        account: &Account,
        now: OffsetDateTime,
    ) -> Option<Notification> {
        let ends_at = sweep.field().value(account)?;

        let owner = match self.store.find_account_owner(account.id).await {
            Ok(owner) => owner,
            Err(e) => {
                tracing::warn!(
                    sweep = sweep.name(),
                    account_id = %account.id,
                    error = %e,
                    "Skipping notification, account owner not found"
                );
                return None;
            }
        };

        let days = days_until(now, ends_at);
        let (subject, body) = match sweep {
            Sweep::ExpiringTrials => trial_expiring_message(&self.config.app_name, days),
            Sweep::PaymentFailed => payment_failed_message(&self.config.app_name, days, ends_at),
        };

        Some(Notification {
            to: owner.email,
            subject,
            body,
        })
    }
}
