//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::JwtManager;
use crate::config::Config;

/// Shared application state, constructed once in `main` and cloned into each
/// handler. Nothing in here is reinitialized per request.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    /// Billing service; `None` when Stripe is not configured, in which case
    /// billing endpoints answer 503.
    pub billing: Option<Arc<resonate_billing::BillingService>>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);

        let billing = if config.enable_billing {
            match resonate_billing::BillingService::from_env(pool.clone()) {
                Ok(svc) => {
                    tracing::info!("Stripe billing service initialized");
                    Some(Arc::new(svc))
                }
                Err(e) => {
                    tracing::warn!("Stripe billing not configured: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("Billing disabled via config (ENABLE_BILLING=false)");
            None
        };

        Self {
            pool,
            config,
            jwt_manager,
            billing,
        }
    }

    /// Billing service, or the 503 every billing route answers without it.
    pub fn billing_service(
        &self,
    ) -> Result<&Arc<resonate_billing::BillingService>, crate::error::ApiError> {
        self.billing
            .as_ref()
            .ok_or(crate::error::ApiError::ServiceUnavailable)
    }
}
