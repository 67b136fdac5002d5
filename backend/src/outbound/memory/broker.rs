//! Per-topic broadcast channels.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use super::lock_state;
use crate::domain::UserTopic;
use crate::domain::ports::{BrokerError, BrokerSubscription, EventBroker};

const DEFAULT_CAPACITY: usize = 256;

/// [`EventBroker`] fanning out within one process.
///
/// Senders for topics without subscribers are dropped on the next publish
/// or subscribe, so idle users do not accumulate channels.
pub struct InMemoryEventBroker {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Default for InMemoryEventBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl InMemoryEventBroker {
    /// Create a broker buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Topics with a live channel.
    pub fn active_topics(&self) -> usize {
        lock_state(&self.topics).len()
    }
}

#[async_trait]
impl EventBroker for InMemoryEventBroker {
    async fn publish(&self, topic: &UserTopic, payload: String) -> Result<(), BrokerError> {
        let mut topics = lock_state(&self.topics);
        let Some(sender) = topics.get(topic.as_str()) else {
            return Ok(());
        };
        if sender.send(payload).is_err() {
            topics.remove(topic.as_str());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &UserTopic) -> Result<BrokerSubscription, BrokerError> {
        let receiver = {
            let mut topics = lock_state(&self.topics);
            topics.retain(|_, sender| sender.receiver_count() > 0);
            topics
                .entry(topic.as_str().to_owned())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        let topic = topic.clone();

        Ok(Box::pin(stream::unfold(
            (receiver, topic),
            |(mut receiver, topic)| async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((payload, (receiver, topic))),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(%topic, skipped, "slow subscriber dropped events");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        )))
    }
}
