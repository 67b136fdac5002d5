//! Processing of authenticated push notifications.
//!
//! Each delivery is claimed in the dedupe store before any work, resolved to
//! its account, serialised through the account lock, and reconciled under a
//! total time bound. Every dispatched notification ends with a
//! `sync_complete` event so clients can settle their loading state.

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use tracing::{debug, info, warn};

use crate::domain::ports::{
    AccountWatchRepository, AccountWatchRepositoryError, DedupeStoreError, DeliveryDedupe,
    SyncMetrics,
};
use crate::domain::{
    AccountLock, AccountWatch, ChangeEvent, EventPublisher, HistoryCursor, HistoryReconciler,
    LockError, MailboxAddress, ReconcileError, SyncStatus,
};

/// Notification decoded from one push delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    /// Transport delivery id used for deduplication.
    pub message_id: String,
    /// Mailbox whose history changed.
    pub mailbox: MailboxAddress,
    /// History id the provider reported with the notification.
    pub cursor_hint: HistoryCursor,
}

/// Successful handling of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The delivery id was already claimed.
    Duplicate,
    /// No account watches the mailbox.
    UnknownMailbox,
    /// Another pass holds the account lock.
    Skipped,
    /// The hint was already covered by the watermark.
    NoOp,
    /// Changes were reconciled.
    Processed {
        /// Events published.
        changes: usize,
        /// Watermark after the pass.
        cursor: HistoryCursor,
    },
    /// The stored cursor is too old; clients were told to reload.
    ResyncRequired,
}

impl PushOutcome {
    /// Status string returned to the push transport.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::UnknownMailbox => "unknown_mailbox",
            Self::Skipped => "skipped",
            Self::NoOp => "noop",
            Self::Processed { .. } => "processed",
            Self::ResyncRequired => "resync_required",
        }
    }
}

/// Failures the push transport should retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushProcessingError {
    /// The dedupe store failed.
    #[error(transparent)]
    Dedupe(#[from] DedupeStoreError),
    /// The account watch lookup failed.
    #[error(transparent)]
    WatchLookup(#[from] AccountWatchRepositoryError),
    /// The lock store failed.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Reconciliation failed transiently.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    /// Reconciliation exceeded its time bound.
    #[error("reconciliation exceeded {limit:?}")]
    Timeout {
        /// Configured bound.
        limit: Duration,
    },
}

/// Tuning for notification processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushProcessingConfig {
    /// How long a delivery id stays claimed.
    pub dedupe_ttl: Duration,
    /// Total bound on one reconciliation pass.
    pub reconcile_timeout: Duration,
}

impl Default for PushProcessingConfig {
    fn default() -> Self {
        Self {
            dedupe_ttl: Duration::from_secs(300),
            reconcile_timeout: Duration::from_secs(60),
        }
    }
}

/// Collaborators of [`PushNotificationService`].
pub struct PushNotificationPorts {
    /// Delivery id claims.
    pub dedupe: Arc<dyn DeliveryDedupe>,
    /// Mailbox to account resolution.
    pub watches: Arc<dyn AccountWatchRepository>,
    /// Metrics exporter.
    pub metrics: Arc<dyn SyncMetrics>,
}

/// Drives the dedupe, lock and reconcile pipeline for push deliveries.
pub struct PushNotificationService {
    dedupe: Arc<dyn DeliveryDedupe>,
    watches: Arc<dyn AccountWatchRepository>,
    metrics: Arc<dyn SyncMetrics>,
    lock: AccountLock,
    reconciler: Arc<HistoryReconciler>,
    publisher: Arc<EventPublisher>,
    clock: Arc<dyn Clock>,
    config: PushProcessingConfig,
}

impl PushNotificationService {
    /// Assemble the service.
    pub fn new(
        ports: PushNotificationPorts,
        lock: AccountLock,
        reconciler: Arc<HistoryReconciler>,
        publisher: Arc<EventPublisher>,
        clock: Arc<dyn Clock>,
        config: PushProcessingConfig,
    ) -> Self {
        Self {
            dedupe: ports.dedupe,
            watches: ports.watches,
            metrics: ports.metrics,
            lock,
            reconciler,
            publisher,
            clock,
            config,
        }
    }

    /// Handle one authenticated, decoded notification.
    pub async fn handle(
        &self,
        notification: &PushNotification,
    ) -> Result<PushOutcome, PushProcessingError> {
        let first = self
            .dedupe
            .first_sighting(&notification.message_id, self.config.dedupe_ttl)
            .await?;
        if !first {
            debug!(message_id = %notification.message_id, "duplicate push delivery");
            self.record(PushOutcome::Duplicate.as_str()).await;
            return Ok(PushOutcome::Duplicate);
        }

        let result = self.dispatch(notification).await;
        match &result {
            Ok(outcome) => self.record(outcome.as_str()).await,
            Err(error) => {
                warn!(
                    message_id = %notification.message_id,
                    mailbox = %notification.mailbox.fingerprint(),
                    %error,
                    "push delivery failed; releasing claim for redelivery"
                );
                if let Err(forget_error) = self.dedupe.forget(&notification.message_id).await {
                    warn!(message_id = %notification.message_id, error = %forget_error, "dedupe claim release failed");
                }
                self.record("failed").await;
            }
        }
        result
    }

    async fn dispatch(
        &self,
        notification: &PushNotification,
    ) -> Result<PushOutcome, PushProcessingError> {
        let Some(watch) = self.watches.find_by_mailbox(&notification.mailbox).await? else {
            info!(
                mailbox = %notification.mailbox.fingerprint(),
                "push notification for unknown mailbox"
            );
            return Ok(PushOutcome::UnknownMailbox);
        };

        let acquired = match self.lock.acquire(&watch.account_id).await {
            Ok(acquired) => acquired,
            Err(error) => {
                self.sync_complete(&watch, notification.cursor_hint, SyncStatus::Failed)
                    .await;
                return Err(error.into());
            }
        };
        let Some(token) = acquired else {
            debug!(account_id = %watch.account_id, "account lock held; skipping pass");
            self.sync_complete(&watch, notification.cursor_hint, SyncStatus::Skipped)
                .await;
            return Ok(PushOutcome::Skipped);
        };

        let result = tokio::time::timeout(
            self.config.reconcile_timeout,
            self.reconciler.reconcile(&watch, notification.cursor_hint),
        )
        .await;

        match self.lock.release(&token).await {
            Ok(true) => {}
            Ok(false) => warn!(account_id = %watch.account_id, "account lock expired before release"),
            Err(error) => warn!(account_id = %watch.account_id, %error, "account lock release failed"),
        }

        self.settle(&watch, notification.cursor_hint, result).await
    }

    async fn settle(
        &self,
        watch: &AccountWatch,
        hint: HistoryCursor,
        result: Result<Result<crate::domain::ReconcileOutcome, ReconcileError>, tokio::time::error::Elapsed>,
    ) -> Result<PushOutcome, PushProcessingError> {
        match result {
            Ok(Ok(outcome)) if outcome.is_noop() => {
                self.sync_complete(watch, outcome.new_cursor, SyncStatus::Noop)
                    .await;
                Ok(PushOutcome::NoOp)
            }
            Ok(Ok(outcome)) => {
                self.sync_complete(watch, outcome.new_cursor, SyncStatus::Applied)
                    .await;
                Ok(PushOutcome::Processed {
                    changes: outcome.applied_changes,
                    cursor: outcome.new_cursor,
                })
            }
            Ok(Err(ReconcileError::StaleCursor { cursor })) => {
                warn!(account_id = %watch.account_id, %cursor, "stored cursor is stale; full resync required");
                let now = self.clock.utc();
                let event = ChangeEvent::resync_required(
                    watch.user_id.clone(),
                    &watch.account_id,
                    hint,
                    now,
                );
                self.publisher.publish(&event).await;
                self.sync_complete(watch, hint, SyncStatus::ResyncRequired)
                    .await;
                Ok(PushOutcome::ResyncRequired)
            }
            Ok(Err(error)) => {
                self.sync_complete(watch, hint, SyncStatus::Failed).await;
                Err(error.into())
            }
            Err(_) => {
                self.sync_complete(watch, hint, SyncStatus::Failed).await;
                Err(PushProcessingError::Timeout {
                    limit: self.config.reconcile_timeout,
                })
            }
        }
    }

    async fn sync_complete(&self, watch: &AccountWatch, history_id: HistoryCursor, status: SyncStatus) {
        let event = ChangeEvent::sync_complete(
            watch.user_id.clone(),
            &watch.account_id,
            history_id,
            status,
            self.clock.utc(),
        );
        self.publisher.publish(&event).await;
    }

    async fn record(&self, outcome: &str) {
        // Exporter failures must not change the transport response.
        let _ = self.metrics.record_delivery(outcome).await;
    }
}

#[cfg(test)]
#[path = "push_notification_service_tests.rs"]
mod tests;
