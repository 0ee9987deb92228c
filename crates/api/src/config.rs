//! API server configuration
//!
//! Loaded from the environment once at startup; the resulting value is part
//! of [`crate::state::AppState`] and shared by reference for the process
//! lifetime.

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string
    pub database_url: String,
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// Secret for signing and verifying session JWTs
    pub jwt_secret: String,
    /// Session token lifetime
    pub jwt_expiry_hours: i64,
    /// Whether to construct the Stripe billing service at startup
    pub enable_billing: bool,
    /// Whether to run embedded migrations at startup
    pub run_migrations: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 bytes");
        }

        let jwt_expiry_hours = std::env::var("JWT_EXPIRY_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(24);

        let enable_billing = std::env::var("ENABLE_BILLING")
            .map(|v| v != "false")
            .unwrap_or(true);

        let run_migrations = std::env::var("RUN_MIGRATIONS")
            .map(|v| v != "false")
            .unwrap_or(true);

        Ok(Self {
            database_url,
            bind_address,
            jwt_secret,
            jwt_expiry_hours,
            enable_billing,
            run_migrations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_required_env() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/resonate_test");
        std::env::set_var("JWT_SECRET", "0123456789abcdef0123456789abcdef");
    }

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "BIND_ADDRESS",
            "JWT_SECRET",
            "JWT_EXPIRY_HOURS",
            "ENABLE_BILLING",
            "RUN_MIGRATIONS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        set_required_env();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.jwt_expiry_hours, 24);
        assert!(config.enable_billing);
        assert!(config.run_migrations);
    }

    #[test]
    #[serial]
    fn test_missing_database_url_rejected() {
        clear_env();
        std::env::set_var("JWT_SECRET", "0123456789abcdef0123456789abcdef");

        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_short_jwt_secret_rejected() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/resonate_test");
        std::env::set_var("JWT_SECRET", "too-short");

        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_billing_can_be_disabled() {
        clear_env();
        set_required_env();
        std::env::set_var("ENABLE_BILLING", "false");

        let config = Config::from_env().unwrap();
        assert!(!config.enable_billing);
    }
}
