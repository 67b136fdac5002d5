//! Lifecycle of provider push watches and the explicit cursor rebase.

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use tracing::{info, warn};

use crate::domain::ports::{
    AccountWatchRepository, AccountWatchRepositoryError, MailProvider, MailProviderError,
    SyncCursorRepository, SyncCursorRepositoryError,
};
use crate::domain::{
    AccountId, AccountLock, AccountWatch, HistoryCursor, HistoryReconciler, LockError,
    MailboxAddress, ReconcileError, UserId,
};

/// Errors raised by watch maintenance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchServiceError {
    /// No watch exists for the account.
    #[error("no push watch registered for account {account_id}")]
    UnknownAccount {
        /// Requested account.
        account_id: AccountId,
    },
    /// Another pass holds the account lock.
    #[error("account {account_id} is locked by another pass")]
    LockBusy {
        /// Locked account.
        account_id: AccountId,
    },
    /// The provider call failed.
    #[error(transparent)]
    Provider(#[from] MailProviderError),
    /// The watch store failed.
    #[error(transparent)]
    Watches(#[from] AccountWatchRepositoryError),
    /// The cursor store failed.
    #[error(transparent)]
    Cursors(#[from] SyncCursorRepositoryError),
    /// The lock store failed.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// The rebase failed.
    #[error(transparent)]
    Rebase(#[from] ReconcileError),
}

/// Summary of one renewal sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewalReport {
    /// Accounts whose watch was renewed.
    pub renewed: Vec<AccountId>,
    /// Accounts whose renewal failed, with the reason.
    pub failed: Vec<(AccountId, String)>,
}

/// Collaborators of [`AccountWatchService`].
pub struct WatchServicePorts {
    /// Provider push-watch API.
    pub provider: Arc<dyn MailProvider>,
    /// Watch persistence.
    pub watches: Arc<dyn AccountWatchRepository>,
    /// Watermark persistence.
    pub cursors: Arc<dyn SyncCursorRepository>,
}

/// Registers, renews and removes push watches.
pub struct AccountWatchService {
    provider: Arc<dyn MailProvider>,
    watches: Arc<dyn AccountWatchRepository>,
    cursors: Arc<dyn SyncCursorRepository>,
    lock: AccountLock,
    reconciler: Arc<HistoryReconciler>,
    clock: Arc<dyn Clock>,
    topic: String,
}

impl AccountWatchService {
    /// Build the service; `topic` is the pub/sub topic the provider pushes to.
    pub fn new(
        ports: WatchServicePorts,
        lock: AccountLock,
        reconciler: Arc<HistoryReconciler>,
        clock: Arc<dyn Clock>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            provider: ports.provider,
            watches: ports.watches,
            cursors: ports.cursors,
            lock,
            reconciler,
            clock,
            topic: topic.into(),
        }
    }

    /// Register push delivery for an account and seed its watermark.
    pub async fn register(
        &self,
        account_id: AccountId,
        user_id: UserId,
        mailbox_address: MailboxAddress,
    ) -> Result<AccountWatch, WatchServiceError> {
        let registration = self
            .provider
            .register_watch(&mailbox_address, &self.topic)
            .await?;
        let watch = AccountWatch {
            account_id,
            user_id,
            mailbox_address,
            provider_cursor: registration.history_id,
            expires_at: registration.expires_at,
        };
        self.watches.upsert(&watch).await?;
        self.cursors
            .advance(&watch.account_id, registration.history_id)
            .await?;
        info!(
            account_id = %watch.account_id,
            mailbox = %watch.mailbox_address.fingerprint(),
            cursor = %registration.history_id,
            expires_at = %watch.expires_at,
            "push watch registered"
        );
        Ok(watch)
    }

    /// Stop push delivery and forget the watch; `false` when none existed.
    pub async fn deregister(&self, account_id: &AccountId) -> Result<bool, WatchServiceError> {
        let Some(watch) = self.watches.find(account_id).await? else {
            return Ok(false);
        };
        match self.provider.deregister_watch(&watch.mailbox_address).await {
            Ok(()) | Err(MailProviderError::NotFound { .. }) => {}
            Err(error) => return Err(error.into()),
        }
        let removed = self.watches.delete(account_id).await?;
        info!(%account_id, "push watch removed");
        Ok(removed)
    }

    /// Renew every watch expiring within `horizon`.
    ///
    /// Failures are collected per account so one bad mailbox does not block
    /// the rest of the sweep.
    pub async fn renew_due(&self, horizon: Duration) -> Result<RenewalReport, WatchServiceError> {
        let horizon = chrono::Duration::from_std(horizon).unwrap_or(chrono::Duration::MAX);
        let due = self.watches.list_expiring(self.clock.utc() + horizon).await?;
        let mut report = RenewalReport::default();

        for watch in due {
            match self.renew(&watch).await {
                Ok(()) => report.renewed.push(watch.account_id),
                Err(error) => {
                    warn!(account_id = %watch.account_id, %error, "push watch renewal failed");
                    report.failed.push((watch.account_id, error.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn renew(&self, watch: &AccountWatch) -> Result<(), WatchServiceError> {
        let registration = self
            .provider
            .register_watch(&watch.mailbox_address, &self.topic)
            .await?;
        let renewed = AccountWatch {
            expires_at: registration.expires_at,
            ..watch.clone()
        };
        self.watches.upsert(&renewed).await?;
        Ok(())
    }

    /// Rebase the account's watermark onto the provider's current cursor.
    pub async fn rebase_cursor(
        &self,
        account_id: &AccountId,
    ) -> Result<HistoryCursor, WatchServiceError> {
        let watch = self
            .watches
            .find(account_id)
            .await?
            .ok_or_else(|| WatchServiceError::UnknownAccount {
                account_id: account_id.clone(),
            })?;
        let token = self
            .lock
            .acquire(account_id)
            .await?
            .ok_or_else(|| WatchServiceError::LockBusy {
                account_id: account_id.clone(),
            })?;

        let result = self.reconciler.rebase(&watch).await;
        if let Err(error) = self.lock.release(&token).await {
            warn!(%account_id, %error, "account lock release failed after rebase");
        }
        Ok(result?)
    }
}
