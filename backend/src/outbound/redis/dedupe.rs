//! Delivery ids recorded as expiring Redis keys.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::redis;

use super::{RedisPool, ttl_millis};
use crate::domain::ports::{DedupeStoreError, DeliveryDedupe};

const KEY_PREFIX: &str = "mailpush:dedupe:";

/// [`DeliveryDedupe`] shared across instances.
#[derive(Clone)]
pub struct RedisDeliveryDedupe {
    pool: RedisPool,
}

impl RedisDeliveryDedupe {
    /// Build the store over `pool`.
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    fn key(message_id: &str) -> String {
        format!("{KEY_PREFIX}{message_id}")
    }
}

#[async_trait]
impl DeliveryDedupe for RedisDeliveryDedupe {
    async fn first_sighting(
        &self,
        message_id: &str,
        ttl: Duration,
    ) -> Result<bool, DedupeStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|error| DedupeStoreError::connection(error.to_string()))?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(message_id))
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await
            .map_err(|error| DedupeStoreError::command(error.to_string()))?;
        Ok(reply.is_some())
    }

    async fn forget(&self, message_id: &str) -> Result<(), DedupeStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|error| DedupeStoreError::connection(error.to_string()))?;
        let _: i64 = redis::cmd("DEL")
            .arg(Self::key(message_id))
            .query_async(&mut *conn)
            .await
            .map_err(|error| DedupeStoreError::command(error.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(
            RedisDeliveryDedupe::key("1234567890"),
            "mailpush:dedupe:1234567890"
        );
    }
}
