//! Billing audit events
//!
//! Append-only log of every billing mutation, keyed back to the Stripe event
//! that caused it. Answers "why is this user on this tier?" and carries the
//! raw data needed to reconcile unmapped prices after the fact.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Types of billing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEventType {
    // Subscription lifecycle
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCanceled,
    CheckoutCompleted,

    // Trial
    TrialStarted,

    // Invoicing
    InvoicePaid,
    InvoiceFailed,

    // Refunds
    RefundIssued,
}

impl std::fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BillingEventType::SubscriptionCreated => "SUBSCRIPTION_CREATED",
            BillingEventType::SubscriptionUpdated => "SUBSCRIPTION_UPDATED",
            BillingEventType::SubscriptionCanceled => "SUBSCRIPTION_CANCELED",
            BillingEventType::CheckoutCompleted => "CHECKOUT_COMPLETED",
            BillingEventType::TrialStarted => "TRIAL_STARTED",
            BillingEventType::InvoicePaid => "INVOICE_PAID",
            BillingEventType::InvoiceFailed => "INVOICE_FAILED",
            BillingEventType::RefundIssued => "REFUND_ISSUED",
        };
        write!(f, "{}", s)
    }
}

/// Who triggered the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorType {
    /// End user through the app
    User,
    /// System automation (worker jobs)
    System,
    /// Stripe webhook
    Stripe,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::User => write!(f, "user"),
            ActorType::System => write!(f, "system"),
            ActorType::Stripe => write!(f, "stripe"),
        }
    }
}

/// A stored billing event
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BillingEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub stripe_event_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub actor_type: String,
    pub created_at: OffsetDateTime,
}

/// Builder for billing events
pub struct BillingEventBuilder {
    user_id: Uuid,
    event_type: BillingEventType,
    event_data: serde_json::Value,
    stripe_event_id: Option<String>,
    stripe_subscription_id: Option<String>,
    stripe_customer_id: Option<String>,
    actor_type: ActorType,
}

impl BillingEventBuilder {
    pub fn new(user_id: Uuid, event_type: BillingEventType) -> Self {
        Self {
            user_id,
            event_type,
            event_data: serde_json::json!({}),
            stripe_event_id: None,
            stripe_subscription_id: None,
            stripe_customer_id: None,
            actor_type: ActorType::System,
        }
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.event_data = data;
        self
    }

    pub fn stripe_event(mut self, event_id: impl Into<String>) -> Self {
        self.stripe_event_id = Some(event_id.into());
        self
    }

    pub fn stripe_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.stripe_subscription_id = Some(subscription_id.into());
        self
    }

    pub fn stripe_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.stripe_customer_id = Some(customer_id.into());
        self
    }

    pub fn actor_type(mut self, actor_type: ActorType) -> Self {
        self.actor_type = actor_type;
        self
    }
}

/// Append-only billing event writer
#[derive(Clone)]
pub struct BillingEventLogger {
    pool: PgPool,
}

impl BillingEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one event. Callers treat failures as non-fatal: losing an audit
    /// row must never fail the mutation it describes.
    pub async fn log_event(&self, builder: BillingEventBuilder) -> BillingResult<Uuid> {
        let record: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO billing_events (
                user_id, event_type, event_data,
                stripe_event_id, stripe_subscription_id, stripe_customer_id,
                actor_type
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(builder.user_id)
        .bind(builder.event_type.to_string())
        .bind(&builder.event_data)
        .bind(builder.stripe_event_id.as_deref())
        .bind(builder.stripe_subscription_id.as_deref())
        .bind(builder.stripe_customer_id.as_deref())
        .bind(builder.actor_type.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(record.0)
    }

    /// Most recent events for a user, newest first.
    pub async fn recent_events(&self, user_id: Uuid, limit: i64) -> BillingResult<Vec<BillingEvent>> {
        let events = sqlx::query_as::<_, BillingEvent>(
            r#"
            SELECT
                id, user_id, event_type, event_data,
                stripe_event_id, stripe_subscription_id, stripe_customer_id,
                actor_type, created_at
            FROM billing_events
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_display() {
        assert_eq!(
            BillingEventType::SubscriptionCanceled.to_string(),
            "SUBSCRIPTION_CANCELED"
        );
        assert_eq!(BillingEventType::RefundIssued.to_string(), "REFUND_ISSUED");
    }

    #[test]
    fn test_actor_type_display() {
        assert_eq!(ActorType::Stripe.to_string(), "stripe");
        assert_eq!(ActorType::System.to_string(), "system");
    }

    #[test]
    fn test_builder_defaults() {
        let user_id = Uuid::new_v4();
        let builder = BillingEventBuilder::new(user_id, BillingEventType::InvoicePaid);
        assert_eq!(builder.user_id, user_id);
        assert_eq!(builder.actor_type, ActorType::System);
        assert!(builder.stripe_event_id.is_none());
        assert_eq!(builder.event_data, serde_json::json!({}));
    }
}
