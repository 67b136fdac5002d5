//! Redis adapters for the cross-process lock, dedupe and broker ports.
//!
//! Commands run on pooled multiplexed connections (`bb8-redis`). Pub/sub
//! needs a dedicated connection per subscription, so the broker keeps the
//! client alongside the pool.

mod broker;
mod dedupe;
mod lock;
mod pool;

pub use broker::RedisEventBroker;
pub use dedupe::RedisDeliveryDedupe;
pub use lock::RedisLockStore;
pub use pool::{RedisPool, RedisPoolError};

use std::time::Duration;

/// Milliseconds for `PX`, never zero so keys always expire.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
