//! Driven port for the upstream mail provider's history and push APIs.
//!
//! The domain owns the request and response shapes so reconciliation and the
//! resilience layer stay independent of the provider's wire format.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::define_port_error;
use crate::domain::{HistoryCursor, MailboxAddress, MessageId};

/// One page request against the provider's change history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Cursor to page from (exclusive).
    pub start: HistoryCursor,
    /// Continuation token returned by the previous page.
    pub page_token: Option<String>,
}

/// One mailbox change within a history record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryChange {
    /// A message was added.
    MessageAdded(MessageId),
    /// A message was permanently removed.
    MessageDeleted(MessageId),
    /// Labels were added to a message.
    LabelsAdded(MessageId),
    /// Labels were removed from a message.
    LabelsRemoved(MessageId),
}

/// Changes recorded at one history id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    /// History id of this record.
    pub id: HistoryCursor,
    /// Changes in provider order.
    pub changes: Vec<HistoryChange>,
}

/// One page of change history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    /// Records in ascending history order.
    pub records: Vec<HistoryRecord>,
    /// Token for the next page, absent on the last page.
    pub next_page_token: Option<String>,
    /// Mailbox history id at the time the page was served.
    pub history_id: HistoryCursor,
}

/// Message metadata returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    /// Provider message id.
    pub id: MessageId,
    /// Conversation the message belongs to.
    pub thread_id: Option<String>,
    /// Labels currently applied.
    pub label_ids: Vec<String>,
    /// Short preview text.
    pub snippet: Option<String>,
    /// Last history id that touched the message.
    pub history_id: Option<HistoryCursor>,
    /// Provider receive time in epoch milliseconds.
    pub internal_date: Option<i64>,
}

/// Result of registering a push watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchRegistration {
    /// Mailbox cursor at registration time.
    pub history_id: HistoryCursor,
    /// When the watch lapses unless renewed.
    pub expires_at: DateTime<Utc>,
}

define_port_error! {
    /// Errors surfaced while calling the mail provider.
    pub enum MailProviderError {
        /// Network transport failed before receiving a response.
        Transport { message: String } => "mail provider transport failed: {message}",
        /// The call exceeded its timeout.
        Timeout { message: String } => "mail provider timeout: {message}",
        /// The provider throttled the request.
        RateLimited { message: String, retry_after: Option<Duration> } =>
            "mail provider rate limited request: {message}",
        /// The provider failed with a server-side status.
        Server { status: u16, message: String } =>
            "mail provider returned {status}: {message}",
        /// The start cursor is too old to page from.
        StaleCursor { message: String } => "history cursor is no longer available: {message}",
        /// The requested resource does not exist.
        NotFound { message: String } => "mail provider resource not found: {message}",
        /// The provider rejected our credentials.
        Unauthorized { message: String } => "mail provider rejected credentials: {message}",
        /// The provider rejected the request as malformed.
        InvalidRequest { message: String } => "mail provider request invalid: {message}",
        /// The response could not be decoded.
        Decode { message: String } => "mail provider response decode failed: {message}",
        /// The circuit breaker rejected the call without contacting the provider.
        CircuitOpen { message: String } => "mail provider circuit open: {message}",
    }
}

impl MailProviderError {
    /// Whether a later attempt (for example a transport redelivery) may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::Server { .. }
                | Self::CircuitOpen { .. }
        )
    }

    /// Whether the outcome indicates an unhealthy dependency.
    ///
    /// Definitive answers such as "not found" or "stale cursor" prove the
    /// provider is responsive, so they do not count against the breaker.
    #[must_use]
    pub fn indicates_unhealthy_dependency(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::RateLimited { .. } | Self::Server { .. }
        )
    }
}

/// Port for the provider's cursor-based history and push-watch APIs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Fetch one page of history after `query.start`.
    async fn list_history(
        &self,
        mailbox: &MailboxAddress,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, MailProviderError>;

    /// Fetch metadata for a single message.
    async fn get_message(
        &self,
        mailbox: &MailboxAddress,
        id: &MessageId,
    ) -> Result<MessageMetadata, MailProviderError>;

    /// Fetch metadata for several messages in one logical call.
    ///
    /// Messages that no longer exist are omitted from the result.
    async fn batch_get_messages(
        &self,
        mailbox: &MailboxAddress,
        ids: &[MessageId],
    ) -> Result<Vec<MessageMetadata>, MailProviderError>;

    /// Read the mailbox's current history id.
    async fn current_cursor(
        &self,
        mailbox: &MailboxAddress,
    ) -> Result<HistoryCursor, MailProviderError>;

    /// Register (or renew) push delivery to `topic`.
    async fn register_watch(
        &self,
        mailbox: &MailboxAddress,
        topic: &str,
    ) -> Result<WatchRegistration, MailProviderError>;

    /// Stop push delivery for the mailbox.
    async fn deregister_watch(&self, mailbox: &MailboxAddress) -> Result<(), MailProviderError>;
}
