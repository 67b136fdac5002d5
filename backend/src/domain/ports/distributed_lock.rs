//! Driven port for short-lived, ownership-tagged mutual exclusion.

use std::time::Duration;

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors raised by lock store adapters.
    pub enum LockStoreError {
        /// Store connection could not be established.
        Connection { message: String } => "lock store unavailable: {message}",
        /// The store rejected or failed the command.
        Command { message: String } => "lock store command failed: {message}",
    }
}

/// Atomic lock primitives over a shared store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Set `key` to `owner` only if absent, expiring after `ttl`.
    ///
    /// Returns `true` when the lock was taken.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration)
    -> Result<bool, LockStoreError>;

    /// Delete `key` only if it still holds `owner`.
    ///
    /// Returns `false` when the lock had expired or belongs to someone else.
    async fn release(&self, key: &str, owner: &str) -> Result<bool, LockStoreError>;
}
