// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Resonate Shared Library
//!
//! Types and helpers used by every Resonate service: the database pool,
//! migrations, and the subscription tier/status vocabulary.

pub mod db;
pub mod types;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use types::{SubscriptionStatus, SubscriptionTier};
