//! Best-effort publication of change events onto per-user broker topics.
//!
//! Publishing never fails for the caller: a reconciliation pass must not be
//! aborted because a live client could not be notified. Failures are logged
//! and counted instead; clients recover through their next reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::domain::ports::{EventBroker, SyncMetrics};
use crate::domain::{ChangeEvent, UserTopic};

/// Publication counters since process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishStats {
    /// Events accepted by the broker.
    pub published: u64,
    /// Events dropped because encoding or the broker failed.
    pub failed: u64,
}

/// Fire-and-forget publisher used by reconciliation and dispatch.
pub struct EventPublisher {
    broker: Arc<dyn EventBroker>,
    metrics: Arc<dyn SyncMetrics>,
    published: AtomicU64,
    failed: AtomicU64,
}

impl EventPublisher {
    /// Create a publisher over `broker`.
    pub fn new(broker: Arc<dyn EventBroker>, metrics: Arc<dyn SyncMetrics>) -> Self {
        Self {
            broker,
            metrics,
            published: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Publish `event` to its recipient's topic.
    pub async fn publish(&self, event: &ChangeEvent) {
        let topic = UserTopic::for_user(&event.user_id);
        let delivered = match serde_json::to_string(event) {
            Ok(payload) => match self.broker.publish(&topic, payload).await {
                Ok(()) => true,
                Err(error) => {
                    warn!(%topic, kind = %event.kind, %error, "change event publish failed");
                    false
                }
            },
            Err(error) => {
                warn!(%topic, kind = %event.kind, %error, "change event encoding failed");
                false
            }
        };

        let counter = if delivered {
            &self.published
        } else {
            &self.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
        // Exporter failures must not turn a delivered event into an error.
        let _ = self.metrics.record_publish(delivered).await;
    }

    /// Snapshot the publication counters.
    #[must_use]
    pub fn stats(&self) -> PublishStats {
        PublishStats {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
