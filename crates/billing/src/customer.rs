//! Stripe customer management
//!
//! A user has at most one Stripe customer, created lazily on their first
//! billing interaction. Lookup always goes through the stored id first.

use sqlx::PgPool;
use stripe::{CreateCustomer, Customer};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

pub struct CustomerService {
    stripe: StripeClient,
    pool: PgPool,
}

impl CustomerService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Return the stored customer id, creating the Stripe customer only if
    /// the user has none yet.
    pub async fn get_or_create_customer(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> BillingResult<String> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let stored = row
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?
            .0;

        if let Some(customer_id) = stored {
            return Ok(customer_id);
        }

        // Create new customer
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("platform".to_string(), "resonate".to_string());

        let params = CreateCustomer {
            email: Some(email),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(self.stripe.inner(), params).await?;

        // Store customer ID in database
        sqlx::query("UPDATE users SET stripe_customer_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(customer.id.as_str())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer.id,
            "Created new Stripe customer"
        );

        Ok(customer.id.to_string())
    }

    /// Stored customer id, if any.
    pub async fn customer_id(&self, user_id: Uuid) -> BillingResult<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(id,)| id)
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))
    }
}
