//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **provider**: reqwest client for the mail provider's REST API
//! - **push_auth**: JWKS-backed identity-token verification
//! - **redis**: lock, dedupe and pub/sub broker for multi-instance deployments
//! - **persistence**: PostgreSQL-backed watch and cursor repositories (Diesel)
//! - **memory**: in-process equivalents for single-instance and development use
//! - **metrics**: Prometheus exporters (feature-gated)
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod memory;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod persistence;
pub mod provider;
pub mod push_auth;
pub mod redis;
