//! Driven port recording push-transport delivery ids already seen.

use std::time::Duration;

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors raised by dedupe store adapters.
    pub enum DedupeStoreError {
        /// Store connection could not be established.
        Connection { message: String } => "dedupe store unavailable: {message}",
        /// The store rejected or failed the command.
        Command { message: String } => "dedupe store command failed: {message}",
    }
}

/// TTL-bound record of delivery ids.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryDedupe: Send + Sync {
    /// Atomically record `message_id` if unseen.
    ///
    /// Returns `true` on first sighting, `false` for a redelivery within `ttl`.
    async fn first_sighting(&self, message_id: &str, ttl: Duration)
    -> Result<bool, DedupeStoreError>;

    /// Drop the record so the next delivery is processed again.
    async fn forget(&self, message_id: &str) -> Result<(), DedupeStoreError>;
}
