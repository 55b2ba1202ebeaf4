//! StarterSaaS Background Worker
//!
//! Handles scheduled jobs including:
//! - Trial expiring notifications (daily, `NOTIFY_TRIALS_CRON`)
//! - Payment failed notifications (daily, `NOTIFY_PAYMENT_FAILED_CRON`)
//! - Heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use startersaas_billing::{BillingResult, BillingService, SweepSummary};
use startersaas_shared::PgAccountStore;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

const DEFAULT_TRIALS_CRON: &str = "0 0 9 * * *";
const DEFAULT_PAYMENT_FAILED_CRON: &str = "0 30 9 * * *";

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

fn cron_from_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Log the outcome of a notification sweep
fn log_sweep_result(sweep: &str, result: BillingResult<SweepSummary>) {
    match result {
        Ok(summary) => info!(
            sweep = sweep,
            matched = summary.matched,
            queued = summary.queued,
            skipped = summary.skipped,
            "Notification sweep complete"
        ),
        Err(e) => error!(sweep = sweep, error = %e, "Notification sweep failed"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting StarterSaaS Worker");

    // Create database pool and bring the schema up to date
    let pool = create_db_pool().await?;
    sqlx::migrate!("../shared/migrations").run(&pool).await?;
    info!("Database migrations applied");

    let store = Arc::new(PgAccountStore::new(pool));

    // Create billing service
    let billing = match BillingService::from_env(store) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            error!(error = %e, "Failed to create billing service");
            return Err(e.into());
        }
    };

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Trial expiring notifications
    let trials_cron = cron_from_env("NOTIFY_TRIALS_CRON", DEFAULT_TRIALS_CRON);
    let trials_billing = billing.clone();
    scheduler
        .add(Job::new_async(trials_cron.as_str(), move |_uuid, _l| {
            let billing = trials_billing.clone();
            Box::pin(async move {
                info!("Running trial expiring notification sweep");
                let result = billing.notifications.run_notify_expiring_trials().await;
                log_sweep_result("expiring_trials", result);
            })
        })?)
        .await?;
    info!(cron = %trials_cron, "Scheduled: Trial expiring notifications");

    // Job 2: Payment failed notifications
    let payment_failed_cron =
        cron_from_env("NOTIFY_PAYMENT_FAILED_CRON", DEFAULT_PAYMENT_FAILED_CRON);
    let payment_failed_billing = billing.clone();
    scheduler
        .add(Job::new_async(
            payment_failed_cron.as_str(),
            move |_uuid, _l| {
                let billing = payment_failed_billing.clone();
                Box::pin(async move {
                    info!("Running payment failed notification sweep");
                    let result = billing.notifications.run_notify_payment_failed().await;
                    log_sweep_result("payment_failed", result);
                })
            },
        )?)
        .await?;
    info!(cron = %payment_failed_cron, "Scheduled: Payment failed notifications");

    // Job 3: Heartbeat (every 5 minutes)
    let heartbeat_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            let billing = heartbeat_billing.clone();
            Box::pin(async move {
                let dispatcher = billing.dispatcher();
                info!(
                    emails_delivered = dispatcher.delivered(),
                    emails_failed = dispatcher.failed(),
                    "Worker heartbeat - all systems operational"
                );
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("StarterSaaS Worker started successfully with {} scheduled jobs", 3);

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutting down, draining pending notification emails");
    billing.dispatcher().flush().await;

    Ok(())
}
