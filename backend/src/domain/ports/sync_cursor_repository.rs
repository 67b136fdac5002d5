//! Driven port persisting the per-account reconciliation watermark.

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::{AccountId, HistoryCursor, SyncCursor};

define_port_error! {
    /// Errors raised by sync cursor persistence adapters.
    pub enum SyncCursorRepositoryError {
        /// Store connection could not be established.
        Connection { message: String } => "sync cursor store unavailable: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "sync cursor query failed: {message}",
    }
}

/// Port for reading and moving the reconciliation watermark.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SyncCursorRepository: Send + Sync {
    /// Load the stored watermark, if any.
    async fn load(&self, account_id: &AccountId)
    -> Result<Option<SyncCursor>, SyncCursorRepositoryError>;

    /// Move the watermark forward.
    ///
    /// Implementations must ignore writes lower than the stored cursor so the
    /// watermark never regresses.
    async fn advance(
        &self,
        account_id: &AccountId,
        cursor: HistoryCursor,
    ) -> Result<(), SyncCursorRepositoryError>;

    /// Overwrite the watermark unconditionally (explicit resync only).
    async fn reset(
        &self,
        account_id: &AccountId,
        cursor: HistoryCursor,
    ) -> Result<(), SyncCursorRepositoryError>;
}
