//! Refund service
//!
//! Pass-through to Stripe's refund API. Charge resolution follows a fixed
//! preference order: an explicitly named charge, else the charge behind the
//! most recent paid invoice, else the customer's most recent charge.

use serde::Serialize;
use sqlx::PgPool;
use stripe::{Charge, ChargeId, CreateRefund, CustomerId, Invoice, ListCharges, Refund, RefundReasonFilter};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::subscriptions::SubscriptionService;

/// Result of a refund operation
#[derive(Debug, Clone, Serialize)]
pub struct RefundResult {
    /// Stripe refund ID
    pub stripe_refund_id: String,
    /// Stripe charge ID that was refunded
    pub stripe_charge_id: String,
    /// Amount refunded in cents
    pub amount_cents: i64,
    /// Whether the refund covered the full charge amount
    pub full_refund: bool,
}

/// A refund is full when it covers at least the charged amount.
pub(crate) fn is_full_refund(amount_refunded_cents: i64, amount_cents: i64) -> bool {
    amount_refunded_cents >= amount_cents
}

/// A charge eligible for refunding
#[derive(Debug, Clone)]
struct ResolvedCharge {
    charge_id: String,
    amount_cents: i64,
}

/// Refund service for handling Stripe refunds
pub struct RefundService {
    stripe: StripeClient,
    pool: PgPool,
    subscriptions: SubscriptionService,
}

impl RefundService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let subscriptions = SubscriptionService::new(stripe.clone(), pool.clone());
        Self {
            stripe,
            pool,
            subscriptions,
        }
    }

    /// Refund a user's charge.
    ///
    /// `amount_cents` of `None` refunds the full charge. The refund audit
    /// fields are overwritten on the user record; a full refund also flips
    /// the subscription status to `refunded` (policy: no forced downgrade).
    pub async fn issue_refund(
        &self,
        user_id: Uuid,
        amount_cents: Option<i64>,
        charge_id: Option<&str>,
    ) -> BillingResult<RefundResult> {
        let customer_id = self.customer_id_for_user(user_id).await?;
        let resolved = self.resolve_charge(&customer_id, charge_id).await?;

        let amount = amount_cents.unwrap_or(resolved.amount_cents);
        let full_refund = is_full_refund(amount, resolved.amount_cents);

        let parsed_charge: ChargeId = resolved
            .charge_id
            .parse()
            .map_err(|e| BillingError::RefundFailed(format!("Invalid charge ID: {}", e)))?;

        let mut params = CreateRefund::new();
        params.charge = Some(parsed_charge);
        params.amount = Some(amount);
        params.reason = Some(RefundReasonFilter::RequestedByCustomer);

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        params.metadata = Some(metadata);

        let refund = match Refund::create(self.stripe.inner(), params).await {
            Ok(refund) => refund,
            Err(e) => {
                let error_msg = e.to_string();
                tracing::error!(
                    user_id = %user_id,
                    charge_id = %resolved.charge_id,
                    error = %error_msg,
                    "Failed to issue refund"
                );
                return Err(BillingError::RefundFailed(error_msg));
            }
        };

        self.subscriptions
            .record_refund(user_id, refund.id.as_str(), amount, full_refund)
            .await?;

        tracing::info!(
            user_id = %user_id,
            refund_id = %refund.id,
            charge_id = %resolved.charge_id,
            amount_cents = amount,
            full_refund = full_refund,
            "Issued refund"
        );

        Ok(RefundResult {
            stripe_refund_id: refund.id.to_string(),
            stripe_charge_id: resolved.charge_id,
            amount_cents: amount,
            full_refund,
        })
    }

    async fn customer_id_for_user(&self, user_id: Uuid) -> BillingResult<String> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?
            .0
            .ok_or(BillingError::NoCustomer)
    }

    /// Resolve the charge to refund, in preference order.
    async fn resolve_charge(
        &self,
        customer_id: &str,
        explicit: Option<&str>,
    ) -> BillingResult<ResolvedCharge> {
        // 1. Explicitly named charge; retrieved so we know its amount.
        if let Some(charge_id) = explicit {
            let parsed: ChargeId = charge_id
                .parse()
                .map_err(|e| BillingError::RefundFailed(format!("Invalid charge ID: {}", e)))?;
            let charge = Charge::retrieve(self.stripe.inner(), &parsed, &[]).await?;
            return Ok(ResolvedCharge {
                charge_id: charge.id.to_string(),
                amount_cents: charge.amount,
            });
        }

        let parsed_customer: CustomerId = customer_id
            .parse()
            .map_err(|e| BillingError::RefundFailed(format!("Invalid customer ID: {}", e)))?;

        // 2. The charge behind the customer's most recent paid invoice.
        let mut params = stripe::ListInvoices::new();
        params.customer = Some(parsed_customer.clone());
        params.status = Some(stripe::InvoiceStatus::Paid);
        params.limit = Some(1);

        let invoices = Invoice::list(self.stripe.inner(), &params).await?;

        if let Some(invoice) = invoices.data.into_iter().next() {
            if let Some(charge_ref) = invoice.charge.as_ref() {
                let charge_id = match charge_ref {
                    stripe::Expandable::Id(id) => id.to_string(),
                    stripe::Expandable::Object(charge) => charge.id.to_string(),
                };
                return Ok(ResolvedCharge {
                    charge_id,
                    amount_cents: invoice.amount_paid.unwrap_or(0),
                });
            }
        }

        // 3. The customer's most recent charge of any kind.
        let mut params = ListCharges::new();
        params.customer = Some(parsed_customer);
        params.limit = Some(1);

        let charges = Charge::list(self.stripe.inner(), &params).await?;

        charges
            .data
            .into_iter()
            .next()
            .map(|charge| ResolvedCharge {
                charge_id: charge.id.to_string(),
                amount_cents: charge.amount,
            })
            .ok_or(BillingError::NoChargeFound)
    }
}
