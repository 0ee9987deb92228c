//! Billing Invariants Module
//!
//! Runnable consistency checks over the reconciled user state. These can be
//! run after any webhook burst or reconciliation sweep to confirm the store
//! is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - a one-way flag or core tier/state rule is broken
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

/// Row type for refund audit violations
#[derive(Debug, sqlx::FromRow)]
struct RefundAuditRow {
    user_id: Uuid,
    email: String,
}

/// Row type for paid-tier linkage violations
#[derive(Debug, sqlx::FromRow)]
struct PaidTierLinkageRow {
    user_id: Uuid,
    email: String,
    subscription_tier: String,
}

/// Row type for stray cancel_at violations
#[derive(Debug, sqlx::FromRow)]
struct StrayCancelAtRow {
    user_id: Uuid,
    cancel_at: Option<OffsetDateTime>,
}

/// Row type for trial flag violations
#[derive(Debug, sqlx::FromRow)]
struct TrialFlagRow {
    user_id: Uuid,
    email: String,
}

/// Row type for lingering period end violations
#[derive(Debug, sqlx::FromRow)]
struct LingeringPeriodEndRow {
    user_id: Uuid,
    subscription_end_date: Option<OffsetDateTime>,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_refunded_has_audit_fields().await?);
        violations.extend(self.check_paid_tier_has_customer().await?);
        violations.extend(self.check_paid_tier_has_subscription().await?);
        violations.extend(self.check_cancel_at_requires_subscription().await?);
        violations.extend(self.check_trial_tier_has_flag().await?);
        violations.extend(self.check_free_canceled_has_no_period_end().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: Refunded status implies refund audit fields
    ///
    /// A user can only reach `refunded` status through a refund, which
    /// overwrites the audit fields on the same write.
    async fn check_refunded_has_audit_fields(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<RefundAuditRow> = sqlx::query_as(
            r#"
            SELECT id as user_id, email
            FROM users
            WHERE subscription_status = 'refunded'
              AND (last_refund_id IS NULL OR last_refund_amount_cents IS NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "refunded_has_audit_fields".to_string(),
                user_ids: vec![row.user_id],
                description: "User is marked refunded but has no refund audit fields".to_string(),
                context: serde_json::json!({
                    "email": row.email,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 2: Paid tiers have a Stripe customer
    async fn check_paid_tier_has_customer(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PaidTierLinkageRow> = sqlx::query_as(
            r#"
            SELECT id as user_id, email, subscription_tier
            FROM users
            WHERE subscription_tier IN ('solo', 'duo', 'family')
              AND (stripe_customer_id IS NULL OR stripe_customer_id = '')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_tier_has_customer".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "User on tier '{}' has no Stripe customer",
                    row.subscription_tier
                ),
                context: serde_json::json!({
                    "email": row.email,
                    "subscription_tier": row.subscription_tier,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: Paid tiers have a Stripe subscription
    ///
    /// A paid tier without a subscription id means the user is getting paid
    /// access that nothing is funding.
    async fn check_paid_tier_has_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PaidTierLinkageRow> = sqlx::query_as(
            r#"
            SELECT id as user_id, email, subscription_tier
            FROM users
            WHERE subscription_tier IN ('solo', 'duo', 'family')
              AND (stripe_subscription_id IS NULL OR stripe_subscription_id = '')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_tier_has_subscription".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "User on tier '{}' has no Stripe subscription",
                    row.subscription_tier
                ),
                context: serde_json::json!({
                    "email": row.email,
                    "subscription_tier": row.subscription_tier,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 4: A scheduled cancellation belongs to a subscription
    async fn check_cancel_at_requires_subscription(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StrayCancelAtRow> = sqlx::query_as(
            r#"
            SELECT id as user_id, cancel_at
            FROM users
            WHERE cancel_at IS NOT NULL
              AND (stripe_subscription_id IS NULL OR stripe_subscription_id = '')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "cancel_at_requires_subscription".to_string(),
                user_ids: vec![row.user_id],
                description: "Scheduled cancellation recorded without a subscription".to_string(),
                context: serde_json::json!({
                    "cancel_at": row.cancel_at,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 5: Trial tier implies the one-way trial flag
    ///
    /// `trial_used` is set in the same write that enters the trial tier, so
    /// a trial user without the flag means the flag was reset.
    async fn check_trial_tier_has_flag(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<TrialFlagRow> = sqlx::query_as(
            r#"
            SELECT id as user_id, email
            FROM users
            WHERE subscription_tier = 'trial'
              AND trial_used = FALSE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "trial_tier_has_flag".to_string(),
                user_ids: vec![row.user_id],
                description: "User is on the trial tier but trial_used is false".to_string(),
                context: serde_json::json!({
                    "email": row.email,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 6: Free tier after cancellation carries no period end
    ///
    /// A subscription-deleted downgrade clears the period end; a lingering
    /// value would wrongly suggest remaining paid time.
    async fn check_free_canceled_has_no_period_end(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<LingeringPeriodEndRow> = sqlx::query_as(
            r#"
            SELECT id as user_id, subscription_end_date
            FROM users
            WHERE subscription_tier = 'free'
              AND subscription_status = 'canceled'
              AND subscription_end_date IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "free_canceled_has_no_period_end".to_string(),
                user_ids: vec![row.user_id],
                description: "Canceled free-tier user still has a period end date".to_string(),
                context: serde_json::json!({
                    "subscription_end_date": row.subscription_end_date,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "refunded_has_audit_fields" => self.check_refunded_has_audit_fields().await,
            "paid_tier_has_customer" => self.check_paid_tier_has_customer().await,
            "paid_tier_has_subscription" => self.check_paid_tier_has_subscription().await,
            "cancel_at_requires_subscription" => self.check_cancel_at_requires_subscription().await,
            "trial_tier_has_flag" => self.check_trial_tier_has_flag().await,
            "free_canceled_has_no_period_end" => self.check_free_canceled_has_no_period_end().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "refunded_has_audit_fields",
            "paid_tier_has_customer",
            "paid_tier_has_subscription",
            "cancel_at_requires_subscription",
            "trial_tier_has_flag",
            "free_canceled_has_no_period_end",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"trial_tier_has_flag"));
        assert!(checks.contains(&"paid_tier_has_subscription"));
    }
}
