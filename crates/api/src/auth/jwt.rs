//! Session JWT issuing and verification

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Claims carried by a session token. `sub` is the opaque user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 token manager, constructed once at startup.
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    pub fn issue_token(&self, user_id: Uuid, email: &str) -> ApiResult<String> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            email: Some(email.to_string()),
            iat: now,
            exp: now + self.expiry_hours * 3600,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Verify signature and expiry; any failure is an authentication failure.
    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| ApiError::AuthenticationRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_token_round_trip() {
        let manager = JwtManager::new(SECRET, 24);
        let user_id = Uuid::new_v4();

        let token = manager.issue_token(user_id, "listener@example.com").unwrap();
        let claims = manager.verify_token(&token).unwrap();

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email.as_deref(), Some("listener@example.com"));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let manager = JwtManager::new(SECRET, 24);
        let token = manager
            .issue_token(Uuid::new_v4(), "listener@example.com")
            .unwrap();

        let mut tampered = token.clone();
        tampered.pop();
        tampered.push(if token.ends_with('A') { 'B' } else { 'A' });

        assert!(manager.verify_token(&tampered).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let manager = JwtManager::new(SECRET, 24);
        let other = JwtManager::new("ffffffffffffffffffffffffffffffff", 24);

        let token = manager
            .issue_token(Uuid::new_v4(), "listener@example.com")
            .unwrap();

        assert!(other.verify_token(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        // Negative expiry puts `exp` an hour in the past, well outside the
        // default validation leeway
        let manager = JwtManager::new(SECRET, -1);
        let token = manager
            .issue_token(Uuid::new_v4(), "listener@example.com")
            .unwrap();

        assert!(manager.verify_token(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let manager = JwtManager::new(SECRET, 24);
        assert!(manager.verify_token("not-a-jwt").is_err());
        assert!(manager.verify_token("").is_err());
    }
}
