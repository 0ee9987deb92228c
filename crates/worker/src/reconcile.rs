//! Scheduled reconciliation over the user store
//!
//! Webhooks are the primary write path, but deliveries can be lost for good
//! (signature misconfiguration, prolonged downtime past Stripe's retry
//! horizon). The sweep catches the observable symptom: a paid or trial tier
//! whose period end passed without a renewal moving it forward.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use resonate_billing::{ActorType, BillingEventBuilder, BillingEventType, BillingService};

/// How long past the period end we wait before downgrading. Covers renewal
/// invoices that settle a little late and webhook redelivery backoff.
const GRACE_DAYS: i64 = 3;

/// Outcome of one reconciliation sweep
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub scanned: usize,
    pub downgraded: usize,
    pub errors: usize,
}

#[derive(Debug, sqlx::FromRow)]
struct LapsedUser {
    id: Uuid,
    subscription_tier: String,
    subscription_end_date: Option<OffsetDateTime>,
}

/// Downgrade users whose paid or trial tier outlived its period end.
pub async fn sweep_lapsed_subscriptions(
    billing: &BillingService,
    pool: &PgPool,
) -> anyhow::Result<SweepOutcome> {
    let lapsed: Vec<LapsedUser> = sqlx::query_as(
        r#"
        SELECT id, subscription_tier, subscription_end_date
        FROM users
        WHERE subscription_tier IN ('trial', 'solo', 'duo', 'family')
          AND subscription_end_date IS NOT NULL
          AND subscription_end_date < NOW() - make_interval(days => $1)
        "#,
    )
    .bind(GRACE_DAYS as i32)
    .fetch_all(pool)
    .await?;

    let mut outcome = SweepOutcome {
        scanned: lapsed.len(),
        ..Default::default()
    };

    for user in &lapsed {
        let reason = if user.subscription_tier == "trial" {
            "trial_expired"
        } else {
            "period_lapsed"
        };

        match billing.subscriptions.downgrade_to_free(user.id, reason).await {
            Ok(()) => {
                outcome.downgraded += 1;

                if let Err(e) = billing
                    .events
                    .log_event(
                        BillingEventBuilder::new(user.id, BillingEventType::SubscriptionCanceled)
                            .data(serde_json::json!({
                                "reason": reason,
                                "previous_tier": user.subscription_tier,
                                "period_end": user.subscription_end_date.map(|t| t.unix_timestamp()),
                            }))
                            .actor_type(ActorType::System),
                    )
                    .await
                {
                    tracing::warn!(user_id = %user.id, error = %e, "Failed to log sweep downgrade event");
                }

                tracing::info!(
                    user_id = %user.id,
                    previous_tier = %user.subscription_tier,
                    reason = %reason,
                    "Downgraded lapsed user"
                );
            }
            Err(e) => {
                outcome.errors += 1;
                tracing::error!(
                    user_id = %user.id,
                    error = %e,
                    "Failed to downgrade lapsed user"
                );
            }
        }
    }

    Ok(outcome)
}

/// Run all billing invariant checks and log any violations.
pub async fn run_invariant_checks(billing: &BillingService) -> anyhow::Result<()> {
    let summary = billing.invariants.run_all_checks().await?;

    if summary.healthy {
        tracing::info!(
            checks_run = summary.checks_run,
            "Billing invariant checks passed"
        );
        return Ok(());
    }

    tracing::error!(
        checks_run = summary.checks_run,
        checks_failed = summary.checks_failed,
        violations = summary.violations.len(),
        "Billing invariant violations found"
    );

    for violation in &summary.violations {
        tracing::error!(
            invariant = %violation.invariant,
            severity = %violation.severity,
            user_ids = ?violation.user_ids,
            description = %violation.description,
            "Invariant violation"
        );
    }

    Ok(())
}
