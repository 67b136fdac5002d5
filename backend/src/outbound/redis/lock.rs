//! `SET NX PX` locks released by a compare-and-delete script.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::redis::{self, Script};

use super::{RedisPool, RedisPoolError, ttl_millis};
use crate::domain::ports::{DistributedLock, LockStoreError};

const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// [`DistributedLock`] shared by every instance pointing at one Redis.
#[derive(Clone)]
pub struct RedisLockStore {
    pool: RedisPool,
    release: Script,
}

impl RedisLockStore {
    /// Build the store over `pool`.
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

/// `SET key owner NX PX ttl`, replying `OK` only when the key was absent.
fn acquire_command(key: &str, owner: &str, ttl: Duration) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(owner).arg("NX").arg("PX").arg(ttl_millis(ttl));
    cmd
}

/// `SET NX` answers nil when another owner holds the key.
fn acquired(reply: Option<&str>) -> bool {
    reply.is_some()
}

/// The script returns the number of keys it deleted.
fn released(deleted: i64) -> bool {
    deleted == 1
}

fn connection_error(error: RedisPoolError) -> LockStoreError {
    LockStoreError::connection(error.to_string())
}

fn command_error(error: redis::RedisError) -> LockStoreError {
    LockStoreError::command(error.to_string())
}

#[async_trait]
impl DistributedLock for RedisLockStore {
    async fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError> {
        let mut conn = self.pool.get().await.map_err(connection_error)?;
        let reply: Option<String> = acquire_command(key, owner, ttl)
            .query_async(&mut *conn)
            .await
            .map_err(command_error)?;
        Ok(acquired(reply.as_deref()))
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool, LockStoreError> {
        let mut conn = self.pool.get().await.map_err(connection_error)?;
        let deleted: i64 = self
            .release
            .key(key)
            .arg(owner)
            .invoke_async(&mut *conn)
            .await
            .map_err(command_error)?;
        Ok(released(deleted))
    }
}
