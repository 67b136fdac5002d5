//! Map-backed watermark store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mockable::Clock;

use super::lock_state;
use crate::domain::ports::{SyncCursorRepository, SyncCursorRepositoryError};
use crate::domain::{AccountId, HistoryCursor, SyncCursor};

/// [`SyncCursorRepository`] kept in process memory.
pub struct InMemorySyncCursorRepository {
    clock: Arc<dyn Clock>,
    cursors: Mutex<HashMap<AccountId, SyncCursor>>,
}

impl InMemorySyncCursorRepository {
    /// Create an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    fn write(&self, account_id: &AccountId, cursor: HistoryCursor, only_forward: bool) {
        let now = self.clock.utc();
        let mut cursors = lock_state(&self.cursors);
        match cursors.get_mut(account_id) {
            Some(existing) if only_forward && existing.last_cursor >= cursor => {}
            Some(existing) => {
                existing.last_cursor = cursor;
                existing.updated_at = now;
            }
            None => {
                cursors.insert(
                    account_id.clone(),
                    SyncCursor {
                        account_id: account_id.clone(),
                        last_cursor: cursor,
                        updated_at: now,
                    },
                );
            }
        }
    }
}

#[async_trait]
impl SyncCursorRepository for InMemorySyncCursorRepository {
    async fn load(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<SyncCursor>, SyncCursorRepositoryError> {
        Ok(lock_state(&self.cursors).get(account_id).cloned())
    }

    async fn advance(
        &self,
        account_id: &AccountId,
        cursor: HistoryCursor,
    ) -> Result<(), SyncCursorRepositoryError> {
        self.write(account_id, cursor, true);
        Ok(())
    }

    async fn reset(
        &self,
        account_id: &AccountId,
        cursor: HistoryCursor,
    ) -> Result<(), SyncCursorRepositoryError> {
        self.write(account_id, cursor, false);
        Ok(())
    }
}
