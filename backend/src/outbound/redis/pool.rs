//! Pooled Redis connections.

use std::time::Duration;

use bb8_redis::bb8::{Pool, PooledConnection, RunError};
use bb8_redis::redis::{self, RedisError};
use bb8_redis::RedisConnectionManager;

/// Errors raised while building or using the pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedisPoolError {
    /// The URL was rejected or the pool could not be built.
    #[error("failed to build redis pool: {message}")]
    Build { message: String },
    /// No connection could be checked out in time.
    #[error("failed to get redis connection: {message}")]
    Checkout { message: String },
}

/// Redis connection pool plus the client used for dedicated pub/sub sockets.
#[derive(Clone)]
pub struct RedisPool {
    inner: Pool<RedisConnectionManager>,
    client: redis::Client,
}

impl RedisPool {
    /// Connect to `url` with at most `max_size` pooled connections.
    ///
    /// # Errors
    ///
    /// Returns [`RedisPoolError::Build`] for invalid URLs or unreachable servers.
    pub async fn connect(
        url: &str,
        max_size: u32,
        connection_timeout: Duration,
    ) -> Result<Self, RedisPoolError> {
        let client = redis::Client::open(url).map_err(build_error)?;
        let manager = RedisConnectionManager::new(url).map_err(build_error)?;
        let inner = Pool::builder()
            .max_size(max_size.max(1))
            .connection_timeout(connection_timeout)
            .build(manager)
            .await
            .map_err(build_error)?;
        Ok(Self { inner, client })
    }

    /// Check out a multiplexed connection.
    pub(super) async fn get(
        &self,
    ) -> Result<PooledConnection<'_, RedisConnectionManager>, RedisPoolError> {
        self.inner.get().await.map_err(|error| match error {
            RunError::User(error) => RedisPoolError::Checkout {
                message: error.to_string(),
            },
            RunError::TimedOut => RedisPoolError::Checkout {
                message: "timed out waiting for a connection".to_owned(),
            },
        })
    }

    pub(super) fn client(&self) -> &redis::Client {
        &self.client
    }
}

fn build_error(error: RedisError) -> RedisPoolError {
    RedisPoolError::Build {
        message: error.to_string(),
    }
}
