// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Resonate Background Worker
//!
//! Handles scheduled jobs:
//! - Reconciliation sweep for lapsed subscriptions (hourly)
//! - Billing invariant checks (daily at 03:41 UTC)

mod reconcile;

use std::sync::Arc;
use std::time::Duration;

use resonate_billing::BillingService;
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
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

    info!("Starting Resonate Worker");

    let pool = create_db_pool().await?;

    let billing = match BillingService::from_env(pool.clone()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            // Without Stripe config there is nothing to reconcile against
            warn!(error = %e, "Failed to create billing service - running in minimal mode");
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    // Run one sweep immediately so a restart doesn't push recovery out by an
    // hour, then hand off to the scheduler
    match reconcile::sweep_lapsed_subscriptions(&billing, &pool).await {
        Ok(outcome) => info!(
            scanned = outcome.scanned,
            downgraded = outcome.downgraded,
            errors = outcome.errors,
            "Initial reconciliation sweep complete"
        ),
        Err(e) => error!(error = %e, "Initial reconciliation sweep failed"),
    }

    let scheduler = JobScheduler::new().await?;

    // Job 1: Reconciliation sweep every hour
    let billing_for_sweep = billing.clone();
    let pool_for_sweep = pool.clone();
    scheduler
        .add(Job::new_async("0 17 * * * *", move |_uuid, _l| {
            let billing = billing_for_sweep.clone();
            let pool = pool_for_sweep.clone();
            Box::pin(async move {
                info!("Running scheduled reconciliation sweep");
                match reconcile::sweep_lapsed_subscriptions(&billing, &pool).await {
                    Ok(outcome) => info!(
                        scanned = outcome.scanned,
                        downgraded = outcome.downgraded,
                        errors = outcome.errors,
                        "Reconciliation sweep complete"
                    ),
                    Err(e) => error!(error = %e, "Reconciliation sweep failed"),
                }
            })
        })?)
        .await?;

    // Job 2: Invariant checks daily at 03:41 UTC
    let billing_for_checks = billing.clone();
    scheduler
        .add(Job::new_async("0 41 3 * * *", move |_uuid, _l| {
            let billing = billing_for_checks.clone();
            Box::pin(async move {
                info!("Running scheduled billing invariant checks");
                if let Err(e) = reconcile::run_invariant_checks(&billing).await {
                    error!(error = %e, "Invariant check run failed");
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    info!("Scheduler started with 2 jobs");

    // Keep the process alive; jobs run on the scheduler's own tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        info!("Worker heartbeat");
    }
}
