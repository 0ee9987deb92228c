//! Billing routes for Stripe integration

use axum::extract::{Extension, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use resonate_billing::{
    ActorType, BillingEventBuilder, BillingEventType, CancelResult, CheckoutResponse, RefundResult,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Request to create a checkout session
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub tier: String,
}

/// Request to refund a charge
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Amount in minor currency units; omitted means a full refund
    pub amount_cents: Option<i64>,
    /// Explicit charge to refund; omitted means "resolve the latest"
    pub charge_id: Option<String>,
}

/// Response from activating a trial
#[derive(Debug, Serialize)]
pub struct TrialResponse {
    pub tier: String,
    pub trial_end: String,
}

/// Subscription info response
#[derive(Debug, Serialize)]
pub struct SubscriptionInfoResponse {
    pub tier: String,
    pub status: String,
    pub current_period_end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_at: Option<String>,
    pub trial_used: bool,
}

/// Handle Stripe webhook events
///
/// The body arrives raw and is verified exactly as received; 200 means
/// applied or already applied, 400 means Stripe should stop retrying, 5xx
/// means retry.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let billing = state.billing_service()?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::BadRequest("Missing Stripe signature".to_string())
        })?;

    let event = billing
        .webhooks
        .verify_event(&body, signature)
        .map_err(|e| {
            tracing::warn!(error = ?e, "Stripe webhook signature verification failed");
            ApiError::BadRequest("Invalid webhook signature".to_string())
        })?;

    tracing::info!(
        event_type = %event.type_,
        event_id = %event.id,
        "Stripe webhook event verified"
    );

    billing.webhooks.handle_event(event).await.map_err(|e| {
        tracing::error!("Webhook handling error: {}", e);
        ApiError::Database(format!("Webhook handling error: {}", e))
    })?;

    Ok(StatusCode::OK)
}

async fn start_checkout(
    state: &AppState,
    auth_user: &AuthUser,
    tier: &str,
) -> Result<CheckoutResponse, ApiError> {
    let billing = state.billing_service()?;

    let email = auth_user.email.as_deref().unwrap_or("");
    let customer_id = billing
        .customer
        .get_or_create_customer(auth_user.user_id, email)
        .await?;

    let session = billing
        .checkout
        .create_subscription_checkout(auth_user.user_id, &customer_id, tier)
        .await?;

    Ok(session)
}

/// JSON callers get the session back; everyone else is redirected straight
/// to Stripe's hosted page.
fn checkout_response(headers: &HeaderMap, session: CheckoutResponse) -> Result<Response, ApiError> {
    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false);

    if wants_json {
        return Ok(Json(session).into_response());
    }

    let url = session
        .url
        .ok_or_else(|| ApiError::Internal("Checkout session has no URL".to_string()))?;

    Ok(Redirect::to(&url).into_response())
}

/// Create a checkout session for a subscription tier
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    headers: HeaderMap,
    Json(req): Json<CheckoutRequest>,
) -> Result<Response, ApiError> {
    let session = start_checkout(&state, &auth_user, &req.tier).await?;
    checkout_response(&headers, session)
}

/// Same as [`create_checkout`] for GET callers (plain link/redirect flows)
pub async fn create_checkout_from_query(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    headers: HeaderMap,
    Query(req): Query<CheckoutRequest>,
) -> Result<Response, ApiError> {
    let session = start_checkout(&state, &auth_user, &req.tier).await?;
    checkout_response(&headers, session)
}

/// Refund the caller's latest charge (or a named one)
pub async fn refund(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<RefundResult>, ApiError> {
    let billing = state.billing_service()?;

    let result = billing
        .refund
        .issue_refund(auth_user.user_id, req.amount_cents, req.charge_id.as_deref())
        .await?;

    Ok(Json(result))
}

/// Flag the caller's subscription for cancellation at period end
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<CancelResult>, ApiError> {
    let billing = state.billing_service()?;

    let result = billing
        .subscriptions
        .cancel_at_period_end(auth_user.user_id)
        .await?;

    Ok(Json(result))
}

/// Start the caller's one-time trial
pub async fn activate_trial(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<TrialResponse>, ApiError> {
    let billing = state.billing_service()?;

    let trial_end = billing
        .subscriptions
        .activate_trial(auth_user.user_id)
        .await?;

    if let Err(e) = billing
        .events
        .log_event(
            BillingEventBuilder::new(auth_user.user_id, BillingEventType::TrialStarted)
                .data(serde_json::json!({
                    "trial_end": trial_end.unix_timestamp(),
                }))
                .actor_type(ActorType::User),
        )
        .await
    {
        tracing::warn!(error = %e, "Failed to log trial started event");
    }

    Ok(Json(TrialResponse {
        tier: "trial".to_string(),
        trial_end: trial_end.format(&Rfc3339).unwrap_or_default(),
    }))
}

/// Current reconciled subscription state for the caller
pub async fn subscription_info(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<SubscriptionInfoResponse>, ApiError> {
    let billing = state.billing_service()?;

    let info = billing
        .subscriptions
        .subscription_info(auth_user.user_id)
        .await?;

    Ok(Json(SubscriptionInfoResponse {
        tier: info.subscription_tier,
        status: info.subscription_status,
        current_period_end: info
            .subscription_end_date
            .map(|t| t.format(&Rfc3339).unwrap_or_default()),
        cancel_at: info.cancel_at.map(|t| t.format(&Rfc3339).unwrap_or_default()),
        trial_used: info.trial_used,
    }))
}
