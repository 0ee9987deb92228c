// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Some Stripe operations require many parameters
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Resonate Billing Module
//!
//! Handles Stripe integration for listener subscriptions.
//!
//! ## Features
//!
//! - **Checkout**: Hosted checkout sessions per subscription tier
//! - **Webhooks**: Verify, deduplicate, and apply Stripe events exactly once
//! - **Subscription State**: Merge-writes into the reconciled user record
//! - **Trials**: One-time trial activation per user
//! - **Refunds**: Charge resolution and full/partial refunds with audit fields
//! - **Invariants**: Runnable consistency checks over the user store

pub mod checkout;
pub mod client;
pub mod customer;
pub mod error;
pub mod events;
pub mod invariants;
pub mod refund;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Checkout
pub use checkout::{CheckoutResponse, CheckoutService};

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Customer
pub use customer::CustomerService;

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{ActorType, BillingEvent, BillingEventBuilder, BillingEventLogger, BillingEventType};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Refund
pub use refund::{RefundResult, RefundService};

// Subscriptions
pub use subscriptions::{
    CancelResult, FieldUpdate, SubscriptionInfo, SubscriptionPatch, SubscriptionService,
    TRIAL_PERIOD_DAYS,
};

// Webhooks
pub use webhooks::WebhookHandler;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub customer: CustomerService,
    pub events: BillingEventLogger,
    pub invariants: InvariantChecker,
    pub refund: RefundService,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::with_client(stripe, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::with_client(StripeClient::new(config), pool)
    }

    fn with_client(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            checkout: CheckoutService::new(stripe.clone(), pool.clone()),
            customer: CustomerService::new(stripe.clone(), pool.clone()),
            events: BillingEventLogger::new(pool.clone()),
            invariants: InvariantChecker::new(pool.clone()),
            refund: RefundService::new(stripe.clone(), pool.clone()),
            subscriptions: SubscriptionService::new(stripe.clone(), pool.clone()),
            webhooks: WebhookHandler::new(stripe, pool),
        }
    }
}
