//! API error types and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use resonate_billing::BillingError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    AuthenticationRequired,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to clients. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            ApiError::Database(_) | ApiError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(serde_json::json!({
            "error": self.public_message(),
        }));

        (status, body).into_response()
    }
}

/// Map billing failures onto the HTTP surface.
///
/// Signature failures are client errors so Stripe stops retrying them;
/// store/SDK failures stay 5xx so Stripe retries the delivery.
impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::WebhookSignatureInvalid => {
                ApiError::BadRequest("invalid webhook signature".to_string())
            }
            BillingError::UnknownTier(tier) => {
                ApiError::BadRequest(format!("unknown subscription tier: {}", tier))
            }
            BillingError::UnknownPrice(price) => {
                ApiError::BadRequest(format!("no tier configured for price: {}", price))
            }
            BillingError::NoChargeFound => {
                ApiError::NotFound("no refundable charge found".to_string())
            }
            BillingError::TrialAlreadyUsed => {
                ApiError::Conflict("trial already used".to_string())
            }
            BillingError::UserNotFound(id) => ApiError::NotFound(format!("no user: {}", id)),
            BillingError::NoCustomer => {
                ApiError::NotFound("user has no billing account".to_string())
            }
            BillingError::NoSubscription => {
                ApiError::NotFound("user has no active subscription".to_string())
            }
            BillingError::Database(msg) => ApiError::Database(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_failure_maps_to_400() {
        let err: ApiError = BillingError::WebhookSignatureInvalid.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unknown_tier_maps_to_400() {
        let err: ApiError = BillingError::UnknownTier("platinum".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_no_charge_maps_to_404() {
        let err: ApiError = BillingError::NoChargeFound.into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_trial_already_used_maps_to_409() {
        let err: ApiError = BillingError::TrialAlreadyUsed.into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_database_failure_maps_to_500_and_hides_detail() {
        let err: ApiError = BillingError::Database("relation users does not exist".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "internal error");
    }

    #[test]
    fn test_auth_required_maps_to_401() {
        assert_eq!(
            ApiError::AuthenticationRequired.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }
}
