//! Redis `PUBLISH`/`SUBSCRIBE` fan-out.

use async_trait::async_trait;
use bb8_redis::redis;
use futures_util::StreamExt;
use tracing::warn;

use super::RedisPool;
use crate::domain::UserTopic;
use crate::domain::ports::{BrokerError, BrokerSubscription, EventBroker};

/// [`EventBroker`] reaching subscribers on every instance.
///
/// Each subscription owns a dedicated pub/sub connection that closes when
/// the returned stream is dropped.
#[derive(Clone)]
pub struct RedisEventBroker {
    pool: RedisPool,
}

impl RedisEventBroker {
    /// Build the broker over `pool`.
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

fn publish_command(topic: &UserTopic, payload: String) -> redis::Cmd {
    let mut cmd = redis::cmd("PUBLISH");
    cmd.arg(topic.as_str()).arg(payload);
    cmd
}

#[async_trait]
impl EventBroker for RedisEventBroker {
    async fn publish(&self, topic: &UserTopic, payload: String) -> Result<(), BrokerError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|error| BrokerError::unavailable(error.to_string()))?;
        let _receivers: i64 = publish_command(topic, payload)
            .query_async(&mut *conn)
            .await
            .map_err(|error| BrokerError::command(error.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &UserTopic) -> Result<BrokerSubscription, BrokerError> {
        let mut pubsub = self
            .pool
            .client()
            .get_async_pubsub()
            .await
            .map_err(|error| BrokerError::unavailable(error.to_string()))?;
        pubsub
            .subscribe(topic.as_str())
            .await
            .map_err(|error| BrokerError::command(error.to_string()))?;

        let topic = topic.clone();
        let messages = pubsub.into_on_message().filter_map(move |message| {
            let decoded = message.get_payload::<String>();
            let topic = topic.clone();
            async move {
                match decoded {
                    Ok(payload) => Some(payload),
                    Err(error) => {
                        warn!(%topic, %error, "non-text broker payload skipped");
                        None
                    }
                }
            }
        });
        Ok(messages.boxed())
    }
}
