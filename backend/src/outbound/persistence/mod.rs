//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! Repositories translate between Diesel rows and domain types and map
//! database failures to the port error enums. Row structs and the schema are
//! private to this module.
//!
//! # Example
//!
//! ```ignore
//! use mailpush::outbound::persistence::{DbPool, DieselSyncCursorRepository, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/mailpush")).await?;
//! let cursors = DieselSyncCursorRepository::new(pool, clock);
//! ```

mod diesel_account_watch_repository;
mod diesel_sync_cursor_repository;
mod error_mapping;
mod models;
mod pool;
mod schema;

pub use diesel_account_watch_repository::DieselAccountWatchRepository;
pub use diesel_sync_cursor_repository::DieselSyncCursorRepository;
pub use pool::{DbPool, PoolConfig, PoolError, run_migrations};
