//! Driven port persisting provider push registrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::define_port_error;
use crate::domain::{AccountId, AccountWatch, MailboxAddress};

define_port_error! {
    /// Errors raised by account watch persistence adapters.
    pub enum AccountWatchRepositoryError {
        /// Store connection could not be established.
        Connection { message: String } => "account watch store unavailable: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "account watch query failed: {message}",
    }
}

/// Port for account watch lookup and maintenance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountWatchRepository: Send + Sync {
    /// Resolve the watch receiving notifications for `mailbox`.
    async fn find_by_mailbox(
        &self,
        mailbox: &MailboxAddress,
    ) -> Result<Option<AccountWatch>, AccountWatchRepositoryError>;

    /// Load the watch for an account.
    async fn find(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<AccountWatch>, AccountWatchRepositoryError>;

    /// Insert or replace the watch for `watch.account_id`.
    async fn upsert(&self, watch: &AccountWatch) -> Result<(), AccountWatchRepositoryError>;

    /// Remove the watch; returns whether one existed.
    async fn delete(&self, account_id: &AccountId) -> Result<bool, AccountWatchRepositoryError>;

    /// Watches expiring at or before `before`, soonest first.
    async fn list_expiring(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<AccountWatch>, AccountWatchRepositoryError>;
}
