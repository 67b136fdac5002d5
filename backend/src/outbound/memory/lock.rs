//! Mutex-guarded lock table with TTL expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;

use super::{expiry, lock_state};
use crate::domain::ports::{DistributedLock, LockStoreError};

struct Held {
    owner: String,
    expires_at: DateTime<Utc>,
}

/// [`DistributedLock`] valid within one process.
pub struct InMemoryLockStore {
    clock: Arc<dyn Clock>,
    held: Mutex<HashMap<String, Held>>,
}

impl InMemoryLockStore {
    /// Create an empty lock table.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            held: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DistributedLock for InMemoryLockStore {
    async fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError> {
        let now = self.clock.utc();
        let mut held = lock_state(&self.held);
        held.retain(|_, entry| entry.expires_at > now);
        if held.contains_key(key) {
            return Ok(false);
        }
        held.insert(
            key.to_owned(),
            Held {
                owner: owner.to_owned(),
                expires_at: expiry(now, ttl),
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool, LockStoreError> {
        let now = self.clock.utc();
        let mut held = lock_state(&self.held);
        match held.get(key) {
            Some(entry) if entry.owner == owner && entry.expires_at > now => {
                held.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
