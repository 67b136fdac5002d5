//! In-process adapters for single-instance deployments and tests.
//!
//! These satisfy the same port contracts as the Redis and PostgreSQL
//! adapters (atomic set-if-absent, compare-and-delete, TTL expiry, monotonic
//! cursors) but only within one process. They are selected when no Redis or
//! database URL is configured.

mod account_watches;
mod broker;
mod dedupe;
mod lock;
mod sync_cursors;

pub use account_watches::InMemoryAccountWatchRepository;
pub use broker::InMemoryEventBroker;
pub use dedupe::InMemoryDeliveryDedupe;
pub use lock::InMemoryLockStore;
pub use sync_cursors::InMemorySyncCursorRepository;

use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock_state<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `now + ttl`, saturating at the latest representable instant.
fn expiry(now: chrono::DateTime<chrono::Utc>, ttl: std::time::Duration) -> chrono::DateTime<chrono::Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}
