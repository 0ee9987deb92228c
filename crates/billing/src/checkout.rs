//! Hosted checkout sessions
//!
//! Builds a Stripe Checkout redirect for a paid tier. The session and its
//! subscription both carry the user id in metadata so the completing webhook
//! can resolve the user even before the customer id is stored.

use serde::Serialize;
use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionSubscriptionData, CustomerId,
};
use uuid::Uuid;

use resonate_shared::SubscriptionTier;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Response from creating a checkout session
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

pub struct CheckoutService {
    stripe: StripeClient,
    #[allow(dead_code)]
    pool: PgPool,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Create a subscription checkout session for a tier selector.
    ///
    /// The selector must resolve to a configured price; free and trial have
    /// no purchase path.
    pub async fn create_subscription_checkout(
        &self,
        user_id: Uuid,
        customer_id: &str,
        tier: &str,
    ) -> BillingResult<CheckoutResponse> {
        let tier = SubscriptionTier::from_str(tier)
            .filter(|t| t.is_paid())
            .ok_or_else(|| BillingError::UnknownTier(tier.to_string()))?;

        let price_id = self
            .stripe
            .config()
            .price_ids
            .price_id_for_tier(tier)
            .ok_or_else(|| BillingError::UnknownTier(tier.to_string()))?
            .to_string();

        let parsed_customer: CustomerId = customer_id
            .parse()
            .map_err(|e| BillingError::Internal(format!("Invalid customer ID: {}", e)))?;

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("tier".to_string(), tier.as_str().to_string());

        let config = self.stripe.config();

        let line_items = vec![CreateCheckoutSessionLineItems {
            price: Some(price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }];

        let params = CreateCheckoutSession {
            customer: Some(parsed_customer),
            mode: Some(CheckoutSessionMode::Subscription),
            line_items: Some(line_items),
            success_url: Some(&config.checkout_success_url),
            cancel_url: Some(&config.checkout_cancel_url),
            metadata: Some(metadata.clone()),
            // Propagate the user id onto the subscription itself so
            // subscription webhooks can fall back to metadata when customer
            // lookup misses.
            subscription_data: Some(CreateCheckoutSessionSubscriptionData {
                metadata: Some(metadata),
                ..Default::default()
            }),
            ..Default::default()
        };

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer_id,
            tier = %tier,
            price_id = %price_id,
            session_id = %session.id,
            "Created checkout session"
        );

        Ok(CheckoutResponse {
            session_id: session.id.to_string(),
            url: session.url,
        })
    }
}
