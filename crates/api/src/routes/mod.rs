//! HTTP routes

pub mod billing;
pub mod health;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::auth::auth_middleware;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // Everything a listener calls directly requires a session token. The
    // webhook is authenticated by its signature header instead.
    let authenticated = Router::new()
        .route(
            "/api/billing/checkout",
            get(billing::create_checkout_from_query).post(billing::create_checkout),
        )
        .route("/api/billing/refund", post(billing::refund))
        .route("/api/billing/cancel", post(billing::cancel_subscription))
        .route("/api/billing/trial", post(billing::activate_trial))
        .route("/api/billing/subscription", get(billing::subscription_info))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/api/billing/webhook", post(billing::webhook))
        .merge(authenticated)
        .with_state(state)
}
