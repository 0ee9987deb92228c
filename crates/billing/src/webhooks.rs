//! Stripe webhook handling
//!
//! Verifies inbound events against the raw request body, claims an exclusive
//! processed-event marker, and applies each event's effect to user state at
//! most once. Delivery is at-least-once and unordered; the marker table and
//! merge-write semantics absorb both.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{Event, EventObject, EventType, Invoice, Subscription, Webhook};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};
use crate::subscriptions::SubscriptionService;

type HmacSha256 = Hmac<Sha256>;

/// Accepted clock skew between Stripe's signature timestamp and ours.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// An event stuck in `processing` longer than this may be re-claimed.
/// This is the crash-recovery window for the mark-processed-first ordering:
/// a delivery that died mid-apply is retried once the window opens.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Parse Stripe's `stripe-signature` header: `t=<unix>,v1=<hex>[,v0=...]`.
fn parse_signature_header(signature: &str) -> Option<(i64, String)> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in signature.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0] {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1].to_string()),
                _ => {}
            }
        }
    }

    Some((timestamp?, v1_signature?))
}

/// Verify the signature over the raw payload at a given clock reading.
///
/// The payload must be the request body exactly as received; any
/// re-serialization invalidates the HMAC.
pub fn verify_signature_at(
    payload: &str,
    signature: &str,
    webhook_secret: &str,
    now_unix: i64,
) -> BillingResult<()> {
    let (timestamp, v1_signature) = parse_signature_header(signature).ok_or_else(|| {
        tracing::error!("Malformed signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::error!(
            timestamp = timestamp,
            now = now_unix,
            diff = (now_unix - timestamp).abs(),
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let secret_key = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|_| {
        tracing::error!("Invalid webhook secret key");
        BillingError::WebhookSignatureInvalid
    })?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::error!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
    subscriptions: SubscriptionService,
    event_logger: BillingEventLogger,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let subscriptions = SubscriptionService::new(stripe.clone(), pool.clone());
        let event_logger = BillingEventLogger::new(pool.clone());
        Self {
            stripe,
            pool,
            subscriptions,
            event_logger,
        }
    }

    /// Verify and parse a Stripe webhook event.
    ///
    /// Tries the SDK's verification first, then falls back to manual HMAC
    /// verification, which tolerates event payloads from Stripe API versions
    /// newer than the SDK's parser expects.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "SDK webhook verification failed, trying manual verification"
                );
            }
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| {
                tracing::error!("System time error: {}", e);
                BillingError::WebhookSignatureInvalid
            })?
            .as_secs() as i64;

        verify_signature_at(payload, signature, webhook_secret, now)?;

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Manual webhook verification passed"
        );

        Ok(event)
    }

    /// Handle a verified Stripe event.
    ///
    /// Uses INSERT...ON CONFLICT...RETURNING to atomically claim exclusive
    /// processing rights before applying any effect. Two concurrent
    /// deliveries of the same event id cannot both pass: only the insert
    /// that returns a row holds the claim. Duplicates acknowledge without
    /// mutating anything.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type_str = event.type_.to_string();

        // Stripe's own timestamp, kept for temporal ordering in the audit trail
        let event_timestamp = OffsetDateTime::from_unix_timestamp(event.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = CONCAT('Recovered from stuck state at ', NOW()::TEXT)
            WHERE stripe_webhook_events.processing_result = 'processing'
              AND stripe_webhook_events.processing_started_at < NOW() - ($4 || ' minutes')::INTERVAL
            RETURNING id
            "#,
        )
        .bind(&event_id)
        .bind(&event_type_str)
        .bind(event_timestamp)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to claim webhook event for processing"
            );
            BillingError::Database(e.to_string())
        })?;

        if claimed.is_none() {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type_str,
                "Duplicate webhook event, acknowledging without reprocessing"
            );
            return Ok(());
        }

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Processing Stripe webhook event"
        );

        let result = self.process_event_internal(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(processing_result)
        .bind(&error_message)
        .bind(&event_id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(
                event_id = %event_id,
                processing_result = %processing_result,
                error = %e,
                "Failed to record webhook processing result; event may appear stuck in 'processing'"
            );
        }

        result
    }

    async fn process_event_internal(&self, event: &Event) -> BillingResult<()> {
        let event_owned = event.clone();

        match event.type_ {
            // Subscription events
            EventType::CustomerSubscriptionCreated => {
                self.handle_subscription_created(event_owned).await?;
            }
            EventType::CustomerSubscriptionUpdated => {
                self.handle_subscription_updated(event_owned).await?;
            }
            EventType::CustomerSubscriptionDeleted => {
                self.handle_subscription_deleted(event_owned).await?;
            }

            // Invoice events. Stripe emits both invoice.paid and
            // invoice.payment_succeeded for one payment; the renewal refresh
            // is a merge-write of the same snapshot, so handling both is safe.
            EventType::InvoicePaid | EventType::InvoicePaymentSucceeded => {
                self.handle_invoice_paid(event_owned).await?;
            }
            EventType::InvoicePaymentFailed => {
                self.handle_invoice_payment_failed(event_owned).await?;
            }

            // Checkout events
            EventType::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event_owned).await?;
            }

            // Charge events
            EventType::ChargeRefunded => {
                self.handle_charge_refunded(event_owned).await?;
            }

            _ => {
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
            }
        }

        Ok(())
    }

    async fn handle_subscription_created(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let subscription = self.extract_subscription(event)?;

        let user_id = match self.resolve_user_for_subscription(&subscription).await? {
            Some(id) => id,
            None => return Ok(()),
        };

        self.subscriptions
            .sync_subscription(user_id, &subscription)
            .await?;

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(user_id, BillingEventType::SubscriptionCreated)
                    .data(serde_json::json!({
                        "status": format!("{:?}", subscription.status),
                        "price_id": first_price_id(&subscription),
                    }))
                    .stripe_event(&event_id)
                    .stripe_subscription(subscription.id.to_string())
                    .actor_type(ActorType::Stripe),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log subscription created event");
        }

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            "Subscription created"
        );

        Ok(())
    }

    async fn handle_subscription_updated(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let subscription = self.extract_subscription(event)?;

        let user_id = match self.resolve_user_for_subscription(&subscription).await? {
            Some(id) => id,
            None => return Ok(()),
        };

        self.subscriptions
            .sync_subscription(user_id, &subscription)
            .await?;

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(user_id, BillingEventType::SubscriptionUpdated)
                    .data(serde_json::json!({
                        "status": format!("{:?}", subscription.status),
                        "cancel_at_period_end": subscription.cancel_at_period_end,
                        "price_id": first_price_id(&subscription),
                    }))
                    .stripe_event(&event_id)
                    .stripe_subscription(subscription.id.to_string())
                    .actor_type(ActorType::Stripe),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log subscription updated event");
        }

        if subscription.status == stripe::SubscriptionStatus::PastDue {
            tracing::warn!(
                user_id = %user_id,
                subscription_id = %subscription.id,
                "Subscription is past due"
            );
        }

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            status = ?subscription.status,
            "Subscription updated"
        );

        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let subscription = self.extract_subscription(event)?;

        let user_id = match self.resolve_user_for_subscription(&subscription).await? {
            Some(id) => id,
            None => return Ok(()),
        };

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(user_id, BillingEventType::SubscriptionCanceled)
                    .data(serde_json::json!({
                        "previous_status": format!("{:?}", subscription.status),
                        "period_end": subscription.current_period_end,
                    }))
                    .stripe_event(&event_id)
                    .stripe_subscription(subscription.id.to_string())
                    .actor_type(ActorType::Stripe),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log subscription deleted event");
        }

        self.subscriptions
            .downgrade_to_free(user_id, "subscription_deleted")
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            "Subscription deleted, downgraded to free tier"
        );

        Ok(())
    }

    /// Renewal: refresh tier, status and period end from the subscription the
    /// invoice belongs to.
    async fn handle_invoice_paid(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let invoice = self.extract_invoice(event)?;

        let user_id = match self.resolve_user_for_invoice(&invoice).await? {
            Some(id) => id,
            None => return Ok(()),
        };

        let invoice_id = invoice.id.to_string();

        let subscription_id = match &invoice.subscription {
            Some(stripe::Expandable::Id(id)) => Some(id.to_string()),
            Some(stripe::Expandable::Object(s)) => Some(s.id.to_string()),
            None => None,
        };

        if let Some(subscription_id) = subscription_id {
            let parsed_sub_id = subscription_id.parse().map_err(|e| {
                BillingError::Internal(format!("Invalid subscription ID on invoice: {}", e))
            })?;
            let subscription =
                Subscription::retrieve(self.stripe.inner(), &parsed_sub_id, &[]).await?;

            self.subscriptions
                .sync_subscription(user_id, &subscription)
                .await?;
        } else {
            tracing::info!(
                user_id = %user_id,
                invoice_id = %invoice_id,
                "Invoice paid without subscription linkage, nothing to refresh"
            );
        }

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(user_id, BillingEventType::InvoicePaid)
                    .data(serde_json::json!({
                        "invoice_id": invoice_id,
                        "amount_paid_cents": invoice.amount_paid,
                    }))
                    .stripe_event(&event_id)
                    .actor_type(ActorType::Stripe),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log invoice paid event");
        }

        tracing::info!(
            user_id = %user_id,
            invoice_id = %invoice_id,
            amount = ?invoice.amount_paid,
            "Invoice paid"
        );

        Ok(())
    }

    /// Grace-period policy: mark past due, leave tier and period end alone.
    async fn handle_invoice_payment_failed(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let invoice = self.extract_invoice(event)?;

        let user_id = match self.resolve_user_for_invoice(&invoice).await? {
            Some(id) => id,
            None => return Ok(()),
        };

        self.subscriptions.mark_past_due(user_id).await?;

        let invoice_id = invoice.id.to_string();

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(user_id, BillingEventType::InvoiceFailed)
                    .data(serde_json::json!({
                        "invoice_id": invoice_id,
                        "amount_due_cents": invoice.amount_due,
                        "attempt_count": invoice.attempt_count,
                    }))
                    .stripe_event(&event_id)
                    .actor_type(ActorType::Stripe),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log invoice payment failed event");
        }

        tracing::warn!(
            user_id = %user_id,
            invoice_id = %invoice_id,
            amount = ?invoice.amount_due,
            "Invoice payment failed, subscription marked past due"
        );

        Ok(())
    }

    async fn handle_checkout_completed(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let session = match event.data.object {
            EventObject::CheckoutSession(session) => session,
            _ => {
                return Err(BillingError::WebhookEventNotSupported(
                    "Expected CheckoutSession".to_string(),
                ))
            }
        };

        // Customer id first, session metadata as fallback: the metadata path
        // covers checkouts completed before the customer id landed in the
        // user record.
        let customer_id = match &session.customer {
            Some(stripe::Expandable::Id(id)) => Some(id.to_string()),
            Some(stripe::Expandable::Object(c)) => Some(c.id.to_string()),
            None => None,
        };

        let mut user_id = match &customer_id {
            Some(id) => self.subscriptions.find_user_by_customer(id).await?,
            None => None,
        };

        if user_id.is_none() {
            user_id = session
                .metadata
                .as_ref()
                .and_then(|m| m.get("user_id"))
                .and_then(|id| Uuid::parse_str(id).ok());
        }

        let user_id = match user_id {
            Some(id) => id,
            None => {
                tracing::warn!(
                    session_id = %session.id,
                    customer_id = ?customer_id,
                    "Checkout completed for unknown user, ignoring"
                );
                return Ok(());
            }
        };

        if let Some(subscription_ref) = session.subscription {
            let parsed_sub_id = subscription_ref.id().parse().map_err(|e| {
                tracing::error!("Failed to parse subscription ID: {}", e);
                BillingError::Internal(format!("Invalid subscription ID on session: {}", e))
            })?;
            let subscription =
                Subscription::retrieve(self.stripe.inner(), &parsed_sub_id, &[]).await?;

            self.subscriptions
                .sync_subscription(user_id, &subscription)
                .await?;

            if let Err(e) = self
                .event_logger
                .log_event(
                    BillingEventBuilder::new(user_id, BillingEventType::CheckoutCompleted)
                        .data(serde_json::json!({
                            "session_id": session.id.to_string(),
                            "price_id": first_price_id(&subscription),
                            "amount_total_cents": session.amount_total,
                        }))
                        .stripe_event(&event_id)
                        .stripe_subscription(subscription.id.to_string())
                        .actor_type(ActorType::Stripe),
                )
                .await
            {
                tracing::warn!(error = %e, "Failed to log checkout completed event");
            }

            tracing::info!(
                user_id = %user_id,
                subscription_id = %subscription.id,
                "Checkout completed, subscription synced"
            );
        } else {
            tracing::warn!(
                user_id = %user_id,
                session_id = %session.id,
                "Checkout completed without a subscription, nothing to sync"
            );
        }

        Ok(())
    }

    async fn handle_charge_refunded(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let charge = match event.data.object {
            EventObject::Charge(charge) => charge,
            _ => {
                return Err(BillingError::WebhookEventNotSupported(
                    "Expected Charge".to_string(),
                ))
            }
        };

        let customer_id = match &charge.customer {
            Some(stripe::Expandable::Id(id)) => id.to_string(),
            Some(stripe::Expandable::Object(c)) => c.id.to_string(),
            None => {
                tracing::warn!(charge_id = %charge.id, "Charge refunded without customer ID");
                return Ok(());
            }
        };

        let user_id = match self.subscriptions.find_user_by_customer(&customer_id).await? {
            Some(id) => id,
            None => {
                tracing::warn!(customer_id = %customer_id, "Charge refunded for unknown customer");
                return Ok(());
            }
        };

        let amount_refunded = charge.amount_refunded;
        let total_amount = charge.amount;
        let is_full_refund = crate::refund::is_full_refund(amount_refunded, total_amount);

        // Stripe embeds the charge's refund list oldest-first; the newest
        // entry is the refund this event announces. Fall back to the charge
        // id when the list is absent.
        let refund_id = charge
            .refunds
            .as_ref()
            .and_then(|refunds| refunds.data.last())
            .map(|r| r.id.to_string())
            .unwrap_or_else(|| charge.id.to_string());

        self.subscriptions
            .record_refund(user_id, &refund_id, amount_refunded, is_full_refund)
            .await?;

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(user_id, BillingEventType::RefundIssued)
                    .data(serde_json::json!({
                        "charge_id": charge.id.to_string(),
                        "refund_id": refund_id,
                        "amount_refunded_cents": amount_refunded,
                        "total_amount_cents": total_amount,
                        "is_full_refund": is_full_refund,
                    }))
                    .stripe_event(&event_id)
                    .stripe_customer(&customer_id)
                    .actor_type(ActorType::Stripe),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log charge refunded event");
        }

        tracing::info!(
            user_id = %user_id,
            charge_id = %charge.id,
            amount_refunded = amount_refunded,
            total_amount = total_amount,
            is_full_refund = is_full_refund,
            "Charge refunded"
        );

        Ok(())
    }

    fn extract_subscription(&self, event: Event) -> BillingResult<Subscription> {
        match event.data.object {
            EventObject::Subscription(subscription) => Ok(subscription),
            _ => Err(BillingError::WebhookEventNotSupported(
                "Expected Subscription".to_string(),
            )),
        }
    }

    fn extract_invoice(&self, event: Event) -> BillingResult<Invoice> {
        match event.data.object {
            EventObject::Invoice(invoice) => Ok(invoice),
            _ => Err(BillingError::WebhookEventNotSupported(
                "Expected Invoice".to_string(),
            )),
        }
    }

    /// Resolve the user a subscription belongs to: customer id first, then
    /// the `user_id` planted in subscription metadata at checkout.
    ///
    /// `None` means the event belongs to a customer this deployment has
    /// never seen (test-mode traffic, foreign account); callers no-op.
    async fn resolve_user_for_subscription(
        &self,
        subscription: &Subscription,
    ) -> BillingResult<Option<Uuid>> {
        let customer_id = match &subscription.customer {
            stripe::Expandable::Id(id) => id.to_string(),
            stripe::Expandable::Object(c) => c.id.to_string(),
        };

        if let Some(user_id) = self.subscriptions.find_user_by_customer(&customer_id).await? {
            return Ok(Some(user_id));
        }

        let from_metadata = subscription
            .metadata
            .get("user_id")
            .and_then(|id| Uuid::parse_str(id).ok());

        if from_metadata.is_none() {
            tracing::warn!(
                subscription_id = %subscription.id,
                customer_id = %customer_id,
                "Subscription event for unknown user, ignoring"
            );
        }

        Ok(from_metadata)
    }

    async fn resolve_user_for_invoice(&self, invoice: &Invoice) -> BillingResult<Option<Uuid>> {
        let customer_id = match &invoice.customer {
            Some(stripe::Expandable::Id(id)) => id.to_string(),
            Some(stripe::Expandable::Object(c)) => c.id.to_string(),
            None => {
                tracing::warn!(invoice_id = %invoice.id, "Invoice event without customer ID");
                return Ok(None);
            }
        };

        let user_id = self.subscriptions.find_user_by_customer(&customer_id).await?;
        if user_id.is_none() {
            tracing::warn!(
                invoice_id = %invoice.id,
                customer_id = %customer_id,
                "Invoice event for unknown customer, ignoring"
            );
        }

        Ok(user_id)
    }
}

fn first_price_id(subscription: &Subscription) -> Option<String> {
    subscription
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref())
        .map(|p| p.id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret_key";

    fn sign(payload: &str, timestamp: i64, secret: &str) -> String {
        let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let signed_payload = format!("{}.{}", timestamp, payload);
        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).unwrap();
        mac.update(signed_payload.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("t={},v1={}", timestamp, sig)
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = r#"{"id":"evt_1","type":"invoice.paid"}"#;
        let now = 1_700_000_000;
        let header = sign(payload, now, SECRET);

        assert!(verify_signature_at(payload, &header, SECRET, now).is_ok());
    }

    #[test]
    fn test_any_payload_mutation_rejected() {
        let payload = r#"{"id":"evt_1","type":"invoice.paid","amount":1000}"#;
        let now = 1_700_000_000;
        let header = sign(payload, now, SECRET);

        // Flip each byte of the payload in turn while holding the signature
        // header fixed; every mutation must fail verification.
        let bytes = payload.as_bytes();
        for i in 0..bytes.len() {
            let mut mutated = bytes.to_vec();
            mutated[i] ^= 0x01;
            let mutated = String::from_utf8_lossy(&mutated).into_owned();
            assert!(
                verify_signature_at(&mutated, &header, SECRET, now).is_err(),
                "mutation at byte {} was accepted",
                i
            );
        }
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign(payload, now, "whsec_other_secret");

        assert!(verify_signature_at(payload, &header, SECRET, now).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let signed_at = 1_700_000_000;
        let header = sign(payload, signed_at, SECRET);

        // Within tolerance
        assert!(verify_signature_at(payload, &header, SECRET, signed_at + 299).is_ok());
        // Outside tolerance, both directions
        assert!(verify_signature_at(payload, &header, SECRET, signed_at + 301).is_err());
        assert!(verify_signature_at(payload, &header, SECRET, signed_at - 301).is_err());
    }

    #[test]
    fn test_malformed_header_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;

        assert!(verify_signature_at(payload, "", SECRET, now).is_err());
        assert!(verify_signature_at(payload, "t=abc,v1=def", SECRET, now).is_err());
        assert!(verify_signature_at(payload, "v1=deadbeef", SECRET, now).is_err());
        assert!(verify_signature_at(payload, "t=1700000000", SECRET, now).is_err());
    }

    #[test]
    fn test_signature_over_raw_body_not_reserialized() {
        // Whitespace-differing but JSON-equivalent bodies must not verify:
        // the HMAC covers the raw bytes, not the parsed value.
        let raw = r#"{"id": "evt_1","object": "event"}"#;
        let reserialized = r#"{"id":"evt_1","object":"event"}"#;
        let now = 1_700_000_000;
        let header = sign(raw, now, SECRET);

        assert!(verify_signature_at(raw, &header, SECRET, now).is_ok());
        assert!(verify_signature_at(reserialized, &header, SECRET, now).is_err());
    }

    #[test]
    fn test_parse_signature_header_ignores_unknown_schemes() {
        let (t, v1) = parse_signature_header("t=123,v0=old,v1=abc").unwrap();
        assert_eq!(t, 123);
        assert_eq!(v1, "abc");
    }
}
