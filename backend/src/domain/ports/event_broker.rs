//! Driven port for cross-process publish/subscribe fan-out.
//!
//! Payloads are opaque strings; the domain encodes [`crate::domain::ChangeEvent`]
//! as JSON before publishing.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use super::define_port_error;
use crate::domain::UserTopic;

define_port_error! {
    /// Errors raised by broker adapters.
    pub enum BrokerError {
        /// The broker could not be reached.
        Unavailable { message: String } => "broker unavailable: {message}",
        /// The broker rejected or failed the command.
        Command { message: String } => "broker command failed: {message}",
    }
}

/// Live subscription to one topic.
///
/// Dropping the stream unsubscribes.
pub type BrokerSubscription = BoxStream<'static, String>;

/// Topic-based publish/subscribe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// Publish `payload` to every current subscriber of `topic`.
    async fn publish(&self, topic: &UserTopic, payload: String) -> Result<(), BrokerError>;

    /// Subscribe to `topic`; messages published afterwards are delivered in order.
    async fn subscribe(&self, topic: &UserTopic) -> Result<BrokerSubscription, BrokerError>;
}
