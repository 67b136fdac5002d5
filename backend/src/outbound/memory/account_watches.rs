//! Map-backed watch registry.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::lock_state;
use crate::domain::ports::{AccountWatchRepository, AccountWatchRepositoryError};
use crate::domain::{AccountId, AccountWatch, MailboxAddress};

/// [`AccountWatchRepository`] kept in process memory.
#[derive(Default)]
pub struct InMemoryAccountWatchRepository {
    watches: Mutex<HashMap<AccountId, AccountWatch>>,
}

impl InMemoryAccountWatchRepository {
    /// Create a registry pre-populated with `watches`.
    pub fn with_watches(watches: impl IntoIterator<Item = AccountWatch>) -> Self {
        Self {
            watches: Mutex::new(
                watches
                    .into_iter()
                    .map(|watch| (watch.account_id.clone(), watch))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl AccountWatchRepository for InMemoryAccountWatchRepository {
    async fn find_by_mailbox(
        &self,
        mailbox: &MailboxAddress,
    ) -> Result<Option<AccountWatch>, AccountWatchRepositoryError> {
        Ok(lock_state(&self.watches)
            .values()
            .find(|watch| &watch.mailbox_address == mailbox)
            .cloned())
    }

    async fn find(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<AccountWatch>, AccountWatchRepositoryError> {
        Ok(lock_state(&self.watches).get(account_id).cloned())
    }

    async fn upsert(&self, watch: &AccountWatch) -> Result<(), AccountWatchRepositoryError> {
        let mut watches = lock_state(&self.watches);
        // One account per mailbox: a re-registration under a new account id
        // replaces the old mapping.
        watches.retain(|id, existing| {
            id == &watch.account_id || existing.mailbox_address != watch.mailbox_address
        });
        watches.insert(watch.account_id.clone(), watch.clone());
        Ok(())
    }

    async fn delete(&self, account_id: &AccountId) -> Result<bool, AccountWatchRepositoryError> {
        Ok(lock_state(&self.watches).remove(account_id).is_some())
    }

    async fn list_expiring(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<AccountWatch>, AccountWatchRepositoryError> {
        let mut due: Vec<AccountWatch> = lock_state(&self.watches)
            .values()
            .filter(|watch| watch.expires_at <= before)
            .cloned()
            .collect();
        due.sort_by_key(|watch| watch.expires_at);
        Ok(due)
    }
}
