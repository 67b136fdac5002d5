//! Per-account mutual exclusion over the shared lock store.
//!
//! A lock is a TTL-bound key owned by a random token. Only the holder of the
//! token can release it; a crashed holder is covered by the TTL alone.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::AccountId;
use crate::domain::ports::{DistributedLock, LockStoreError};

/// Default lock lifetime.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

/// Errors raised while taking or releasing an account lock.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// The lock store could not be reached or rejected the command.
    #[error(transparent)]
    Store(#[from] LockStoreError),
}

/// Proof of lock ownership returned by [`AccountLock::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    account_id: AccountId,
    key: String,
    owner: String,
}

impl LockToken {
    /// Account the lock covers.
    #[must_use]
    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// Owner token stored under the lock key.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

/// Account-keyed lock built on a [`DistributedLock`] store.
#[derive(Clone)]
pub struct AccountLock {
    store: Arc<dyn DistributedLock>,
    ttl: Duration,
}

impl AccountLock {
    /// Create a lock service with the given TTL.
    pub fn new(store: Arc<dyn DistributedLock>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Store key for an account's lock.
    ///
    /// # Examples
    /// ```
    /// use mailpush::domain::{AccountId, AccountLock};
    ///
    /// let account = AccountId::new("acct-9").expect("valid account");
    /// assert_eq!(AccountLock::key_for(&account), "mailpush:lock:account:acct-9");
    /// ```
    #[must_use]
    pub fn key_for(account_id: &AccountId) -> String {
        format!("mailpush:lock:account:{account_id}")
    }

    /// Try to take the lock; `None` means another holder owns it.
    pub async fn acquire(&self, account_id: &AccountId) -> Result<Option<LockToken>, LockError> {
        let key = Self::key_for(account_id);
        let owner = Uuid::new_v4().to_string();
        let acquired = self.store.try_acquire(&key, &owner, self.ttl).await?;
        Ok(acquired.then(|| LockToken {
            account_id: account_id.clone(),
            key,
            owner,
        }))
    }

    /// Release a held lock; `false` means it had already expired or changed hands.
    pub async fn release(&self, token: &LockToken) -> Result<bool, LockError> {
        Ok(self.store.release(&token.key, &token.owner).await?)
    }
}
