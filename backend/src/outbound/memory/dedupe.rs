//! TTL-bound set of delivery ids.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;

use super::{expiry, lock_state};
use crate::domain::ports::{DedupeStoreError, DeliveryDedupe};

/// [`DeliveryDedupe`] valid within one process.
pub struct InMemoryDeliveryDedupe {
    clock: Arc<dyn Clock>,
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryDeliveryDedupe {
    /// Create an empty record.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            seen: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DeliveryDedupe for InMemoryDeliveryDedupe {
    async fn first_sighting(
        &self,
        message_id: &str,
        ttl: Duration,
    ) -> Result<bool, DedupeStoreError> {
        let now = self.clock.utc();
        let mut seen = lock_state(&self.seen);
        seen.retain(|_, expires_at| *expires_at > now);
        if seen.contains_key(message_id) {
            return Ok(false);
        }
        seen.insert(message_id.to_owned(), expiry(now, ttl));
        Ok(true)
    }

    async fn forget(&self, message_id: &str) -> Result<(), DedupeStoreError> {
        lock_state(&self.seen).remove(message_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::resilience::MutableClock;
    use chrono::TimeZone;

    #[tokio::test]
    async fn records_expire_and_can_be_forgotten() {
        let clock = Arc::new(MutableClock::new(
            Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0)
                .single()
                .expect("valid timestamp"),
        ));
        let dedupe = InMemoryDeliveryDedupe::new(Arc::clone(&clock) as Arc<dyn Clock>);
        let ttl = Duration::from_secs(300);

        assert!(dedupe.first_sighting("m1", ttl).await.expect("first"));
        assert!(!dedupe.first_sighting("m1", ttl).await.expect("repeat"));

        dedupe.forget("m1").await.expect("forget");
        assert!(dedupe.first_sighting("m1", ttl).await.expect("after forget"));

        clock.advance_seconds(301);
        assert!(dedupe.first_sighting("m1", ttl).await.expect("after expiry"));
    }
}
