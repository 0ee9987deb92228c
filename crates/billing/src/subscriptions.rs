//! Subscription state writer
//!
//! All webhook handlers and user-facing endpoints funnel their mutations
//! through [`SubscriptionService::apply_patch`]: a single merge-write that
//! only touches the fields a patch names. Applying the same patch twice
//! yields the same stored state.

use serde::Serialize;
use sqlx::PgPool;
use stripe::{
    Subscription, SubscriptionId, SubscriptionStatus as StripeSubStatus, UpdateSubscription,
};
use time::OffsetDateTime;
use uuid::Uuid;

use resonate_shared::{SubscriptionStatus, SubscriptionTier};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Trial length granted by [`SubscriptionService::activate_trial`].
pub const TRIAL_PERIOD_DAYS: i64 = 14;

/// Three-state update for a nullable column: leave it alone, set it, or
/// clear it to NULL. `Option` alone cannot express the difference between
/// "don't touch" and "write NULL".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T: Clone> FieldUpdate<T> {
    /// Split into (touch, value) for binding into the merge-write SQL.
    fn write_parts(&self) -> (bool, Option<T>) {
        match self {
            FieldUpdate::Keep => (false, None),
            FieldUpdate::Set(v) => (true, Some(v.clone())),
            FieldUpdate::Clear => (true, None),
        }
    }
}

/// Partial update of a user's subscription state.
///
/// Unset fields are left exactly as stored; nothing here can clobber a field
/// the caller did not name.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub tier: Option<SubscriptionTier>,
    pub status: Option<SubscriptionStatus>,
    pub period_end: FieldUpdate<OffsetDateTime>,
    pub cancel_at: FieldUpdate<OffsetDateTime>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub downgrade_reason: Option<String>,
}

/// Read-back of the reconciled subscription state for one user.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubscriptionInfo {
    pub subscription_tier: String,
    pub subscription_status: String,
    pub subscription_end_date: Option<OffsetDateTime>,
    pub cancel_at: Option<OffsetDateTime>,
    pub trial_used: bool,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

/// Result of a cancel-at-period-end request.
#[derive(Debug, Clone, Serialize)]
pub struct CancelResult {
    pub stripe_subscription_id: String,
    pub cancel_at: Option<OffsetDateTime>,
}

/// Map Stripe's subscription status to the stored vocabulary.
pub fn map_subscription_status(status: StripeSubStatus) -> SubscriptionStatus {
    match status {
        StripeSubStatus::Active => SubscriptionStatus::Active,
        StripeSubStatus::Trialing => SubscriptionStatus::Trialing,
        StripeSubStatus::PastDue => SubscriptionStatus::PastDue,
        StripeSubStatus::Canceled => SubscriptionStatus::Canceled,
        StripeSubStatus::Unpaid => SubscriptionStatus::Unpaid,
        StripeSubStatus::Incomplete => SubscriptionStatus::Incomplete,
        StripeSubStatus::IncompleteExpired => SubscriptionStatus::IncompleteExpired,
        StripeSubStatus::Paused => SubscriptionStatus::Paused,
    }
}

/// Subscription state service
pub struct SubscriptionService {
    stripe: StripeClient,
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Merge-write a partial subscription state into the user record.
    ///
    /// One UPDATE, idempotent, never touches fields the patch leaves unset.
    pub async fn apply_patch(&self, user_id: Uuid, patch: &SubscriptionPatch) -> BillingResult<()> {
        let (touch_period_end, period_end) = patch.period_end.write_parts();
        let (touch_cancel_at, cancel_at) = patch.cancel_at.write_parts();

        let result = sqlx::query(
            r#"
            UPDATE users SET
                subscription_tier = COALESCE($2, subscription_tier),
                subscription_status = COALESCE($3, subscription_status),
                subscription_end_date = CASE WHEN $4 THEN $5 ELSE subscription_end_date END,
                cancel_at = CASE WHEN $6 THEN $7 ELSE cancel_at END,
                stripe_customer_id = COALESCE($8, stripe_customer_id),
                stripe_subscription_id = COALESCE($9, stripe_subscription_id),
                downgrade_reason = COALESCE($10, downgrade_reason),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(patch.tier.map(|t| t.as_str()))
        .bind(patch.status.map(|s| s.as_str()))
        .bind(touch_period_end)
        .bind(period_end)
        .bind(touch_cancel_at)
        .bind(cancel_at)
        .bind(patch.stripe_customer_id.as_deref())
        .bind(patch.stripe_subscription_id.as_deref())
        .bind(patch.downgrade_reason.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::UserNotFound(user_id.to_string()));
        }

        Ok(())
    }

    /// Build the patch a Stripe subscription snapshot implies.
    ///
    /// A subscription flagged `cancel_at_period_end` keeps its tier active and
    /// records the scheduled cancellation timestamp; otherwise any previously
    /// recorded cancellation is cleared. An unmapped price id produces no tier
    /// write; the raw price id stays in the audit log for later reconciliation.
    pub fn patch_from_subscription(&self, subscription: &Subscription) -> SubscriptionPatch {
        let price_id = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|p| p.id.to_string());

        let tier = match price_id.as_deref() {
            Some(price_id) => {
                let tier = self.stripe.config().price_ids.tier_for_price_id(price_id);
                if tier.is_none() {
                    tracing::warn!(
                        subscription_id = %subscription.id,
                        price_id = %price_id,
                        "Subscription price has no configured tier; leaving tier unchanged"
                    );
                }
                tier
            }
            None => None,
        };

        let period_end = OffsetDateTime::from_unix_timestamp(subscription.current_period_end)
            .map(FieldUpdate::Set)
            .unwrap_or(FieldUpdate::Keep);

        let cancel_at = if subscription.cancel_at_period_end {
            let at = subscription
                .cancel_at
                .unwrap_or(subscription.current_period_end);
            OffsetDateTime::from_unix_timestamp(at)
                .map(FieldUpdate::Set)
                .unwrap_or(FieldUpdate::Keep)
        } else {
            FieldUpdate::Clear
        };

        let customer_id = match &subscription.customer {
            stripe::Expandable::Id(id) => id.to_string(),
            stripe::Expandable::Object(c) => c.id.to_string(),
        };

        SubscriptionPatch {
            tier,
            status: Some(map_subscription_status(subscription.status)),
            period_end,
            cancel_at,
            stripe_customer_id: Some(customer_id),
            stripe_subscription_id: Some(subscription.id.to_string()),
            downgrade_reason: None,
        }
    }

    /// Sync a Stripe subscription snapshot into the user record.
    pub async fn sync_subscription(
        &self,
        user_id: Uuid,
        subscription: &Subscription,
    ) -> BillingResult<()> {
        let patch = self.patch_from_subscription(subscription);
        self.apply_patch(user_id, &patch).await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            status = ?subscription.status,
            cancel_at_period_end = subscription.cancel_at_period_end,
            "Synced subscription state"
        );

        Ok(())
    }

    /// Immediately drop the user to the free tier.
    ///
    /// Clears the period end and any scheduled cancellation; the reason is
    /// recorded for audit.
    pub async fn downgrade_to_free(&self, user_id: Uuid, reason: &str) -> BillingResult<()> {
        let patch = SubscriptionPatch {
            tier: Some(SubscriptionTier::Free),
            status: Some(SubscriptionStatus::Canceled),
            period_end: FieldUpdate::Clear,
            cancel_at: FieldUpdate::Clear,
            downgrade_reason: Some(reason.to_string()),
            ..Default::default()
        };
        self.apply_patch(user_id, &patch).await?;

        tracing::info!(user_id = %user_id, reason = %reason, "Downgraded user to free tier");
        Ok(())
    }

    /// Grace-period policy: mark the subscription past due without touching
    /// tier or period end.
    pub async fn mark_past_due(&self, user_id: Uuid) -> BillingResult<()> {
        let patch = SubscriptionPatch {
            status: Some(SubscriptionStatus::PastDue),
            ..Default::default()
        };
        self.apply_patch(user_id, &patch).await
    }

    /// Record refund audit fields; a full refund also marks the subscription
    /// status as refunded (tier and period end are left alone).
    pub async fn record_refund(
        &self,
        user_id: Uuid,
        refund_id: &str,
        amount_cents: i64,
        full: bool,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                last_refund_id = $2,
                last_refund_amount_cents = $3,
                subscription_status = CASE WHEN $4 THEN 'refunded' ELSE subscription_status END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(refund_id)
        .bind(amount_cents)
        .bind(full)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::UserNotFound(user_id.to_string()));
        }

        tracing::info!(
            user_id = %user_id,
            refund_id = %refund_id,
            amount_cents = amount_cents,
            full = full,
            "Recorded refund"
        );

        Ok(())
    }

    /// Start the one-time trial for a user.
    ///
    /// The guard on `trial_used` makes the false-to-true transition happen at
    /// most once; a second activation attempt affects zero rows.
    pub async fn activate_trial(&self, user_id: Uuid) -> BillingResult<OffsetDateTime> {
        let trial_end = OffsetDateTime::now_utc() + time::Duration::days(TRIAL_PERIOD_DAYS);

        let result = sqlx::query(
            r#"
            UPDATE users SET
                subscription_tier = 'trial',
                subscription_status = 'trialing',
                subscription_end_date = $2,
                trial_used = TRUE,
                updated_at = NOW()
            WHERE id = $1 AND trial_used = FALSE
            "#,
        )
        .bind(user_id)
        .bind(trial_end)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish "already used" from "no such user"
            let exists: Option<(bool,)> =
                sqlx::query_as("SELECT trial_used FROM users WHERE id = $1")
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await?;

            return match exists {
                Some(_) => Err(BillingError::TrialAlreadyUsed),
                None => Err(BillingError::UserNotFound(user_id.to_string())),
            };
        }

        tracing::info!(user_id = %user_id, trial_end = %trial_end, "Trial activated");
        Ok(trial_end)
    }

    /// Read back the reconciled subscription state.
    pub async fn subscription_info(&self, user_id: Uuid) -> BillingResult<SubscriptionInfo> {
        let info: Option<SubscriptionInfo> = sqlx::query_as(
            r#"
            SELECT
                subscription_tier,
                subscription_status,
                subscription_end_date,
                cancel_at,
                trial_used,
                stripe_customer_id,
                stripe_subscription_id
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        info.ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))
    }

    /// Resolve a user by their Stripe customer id.
    ///
    /// Returns `Ok(None)` when no user matches; webhook handlers treat that
    /// as a no-op since the customer may belong to another environment.
    pub async fn find_user_by_customer(&self, customer_id: &str) -> BillingResult<Option<Uuid>> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE stripe_customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| id))
    }

    /// Flag the user's subscription for cancellation at period end.
    ///
    /// Pure pass-through to Stripe; the local `cancel_at` is written from the
    /// updated subscription so the webhook confirming it is a no-op rewrite.
    pub async fn cancel_at_period_end(&self, user_id: Uuid) -> BillingResult<CancelResult> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_subscription_id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let subscription_id = row
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?
            .0
            .ok_or(BillingError::NoSubscription)?;

        let parsed_id: SubscriptionId = subscription_id
            .parse()
            .map_err(|e| BillingError::Internal(format!("Invalid subscription ID: {}", e)))?;

        let mut params = UpdateSubscription::new();
        params.cancel_at_period_end = Some(true);

        let subscription = Subscription::update(self.stripe.inner(), &parsed_id, params).await?;

        self.sync_subscription(user_id, &subscription).await?;

        let cancel_at = subscription
            .cancel_at
            .or(Some(subscription.current_period_end))
            .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok());

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            cancel_at = ?cancel_at,
            "Subscription flagged for cancellation at period end"
        );

        Ok(CancelResult {
            stripe_subscription_id: subscription.id.to_string(),
            cancel_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_update_write_parts() {
        let keep: FieldUpdate<i64> = FieldUpdate::Keep;
        assert_eq!(keep.write_parts(), (false, None));

        let set = FieldUpdate::Set(42i64);
        assert_eq!(set.write_parts(), (true, Some(42)));

        let clear: FieldUpdate<i64> = FieldUpdate::Clear;
        assert_eq!(clear.write_parts(), (true, None));
    }

    #[test]
    fn test_default_patch_touches_nothing() {
        let patch = SubscriptionPatch::default();
        assert!(patch.tier.is_none());
        assert!(patch.status.is_none());
        assert_eq!(patch.period_end, FieldUpdate::Keep);
        assert_eq!(patch.cancel_at, FieldUpdate::Keep);
        assert!(patch.stripe_customer_id.is_none());
        assert!(patch.stripe_subscription_id.is_none());
        assert!(patch.downgrade_reason.is_none());
    }

    #[test]
    fn test_status_mapping_covers_processor_vocabulary() {
        assert_eq!(
            map_subscription_status(StripeSubStatus::Active),
            SubscriptionStatus::Active
        );
        assert_eq!(
            map_subscription_status(StripeSubStatus::PastDue),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            map_subscription_status(StripeSubStatus::Canceled),
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            map_subscription_status(StripeSubStatus::IncompleteExpired),
            SubscriptionStatus::IncompleteExpired
        );
    }
}
