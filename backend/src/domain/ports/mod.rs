//! Domain ports defining the edges of the hexagon.
//!
//! Ports describe how the pipeline reaches the mail provider, the shared
//! lock/dedupe/broker store, durable cursor storage and metrics exporters.
//! Each trait exposes strongly typed errors so adapters map their failures
//! into predictable variants.

mod macros;

mod account_watch_repository;
mod delivery_dedupe;
mod distributed_lock;
mod event_broker;
mod mail_provider;
mod push_token_verifier;
mod sync_cursor_repository;
mod sync_metrics;

pub(crate) use macros::define_port_error;

#[cfg(test)]
pub use account_watch_repository::MockAccountWatchRepository;
pub use account_watch_repository::{AccountWatchRepository, AccountWatchRepositoryError};
#[cfg(test)]
pub use delivery_dedupe::MockDeliveryDedupe;
pub use delivery_dedupe::{DedupeStoreError, DeliveryDedupe};
#[cfg(test)]
pub use distributed_lock::MockDistributedLock;
pub use distributed_lock::{DistributedLock, LockStoreError};
#[cfg(test)]
pub use event_broker::MockEventBroker;
pub use event_broker::{BrokerError, BrokerSubscription, EventBroker};
#[cfg(test)]
pub use mail_provider::MockMailProvider;
pub use mail_provider::{
    HistoryChange, HistoryPage, HistoryQuery, HistoryRecord, MailProvider, MailProviderError,
    MessageMetadata, WatchRegistration,
};
#[cfg(test)]
pub use push_token_verifier::MockPushTokenVerifier;
pub use push_token_verifier::{PushIdentity, PushTokenError, PushTokenVerifier};
#[cfg(test)]
pub use sync_cursor_repository::MockSyncCursorRepository;
pub use sync_cursor_repository::{SyncCursorRepository, SyncCursorRepositoryError};
pub use sync_metrics::{NoOpSyncMetrics, SyncMetrics, SyncMetricsError};
