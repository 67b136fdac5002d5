//! Incremental reconciliation of one account against the provider history.
//!
//! A pass pages forward from the stored watermark, publishes one event per
//! touched message in page order, and only then advances the watermark. A
//! failed pass leaves the watermark untouched so the next notification
//! replays the same range; clients merge replayed events idempotently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mockable::Clock;
use tracing::{debug, info, warn};

use crate::domain::ports::{
    HistoryPage, HistoryQuery, MailProvider, MailProviderError, MessageMetadata, SyncCursorRepository,
    SyncCursorRepositoryError, SyncMetrics,
};
use crate::domain::{
    AccountWatch, ChangeEvent, ChangeKind, EventPublisher, HistoryCursor, MessageId, SyncStatus,
};

mod classify;

use classify::{PageChange, classify_page};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Change events published during the pass.
    pub applied_changes: usize,
    /// Watermark before the pass.
    pub previous_cursor: HistoryCursor,
    /// Watermark after the pass.
    pub new_cursor: HistoryCursor,
    /// History pages fetched.
    pub pages: u32,
}

impl ReconcileOutcome {
    /// Whether the pass was skipped because the hint was already covered.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.pages == 0
    }
}

/// Failures of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// The provider no longer holds history from the stored cursor.
    #[error("history cursor {cursor} is too old to page from")]
    StaleCursor {
        /// Cursor the pass tried to page from.
        cursor: HistoryCursor,
    },
    /// The provider call failed.
    #[error(transparent)]
    Upstream(MailProviderError),
    /// The provider handed back a continuation token it had already issued.
    #[error("history pagination repeated page token {token:?}")]
    PaginationLoop {
        /// Repeated token.
        token: String,
    },
    /// The watermark could not be read or written.
    #[error(transparent)]
    CursorStore(#[from] SyncCursorRepositoryError),
}

impl ReconcileError {
    /// Whether the push transport should redeliver the notification.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::StaleCursor { .. })
    }

    fn from_provider(error: MailProviderError, cursor: HistoryCursor) -> Self {
        match error {
            MailProviderError::StaleCursor { .. } => Self::StaleCursor { cursor },
            other => Self::Upstream(other),
        }
    }
}

/// Drives reconciliation for one account at a time.
///
/// Callers are responsible for holding the account lock.
pub struct HistoryReconciler {
    provider: Arc<dyn MailProvider>,
    cursors: Arc<dyn SyncCursorRepository>,
    publisher: Arc<EventPublisher>,
    metrics: Arc<dyn SyncMetrics>,
    clock: Arc<dyn Clock>,
}

impl HistoryReconciler {
    /// Create a reconciler.
    pub fn new(
        provider: Arc<dyn MailProvider>,
        cursors: Arc<dyn SyncCursorRepository>,
        publisher: Arc<EventPublisher>,
        metrics: Arc<dyn SyncMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            cursors,
            publisher,
            metrics,
            clock,
        }
    }

    /// Bring the account up to `hint`, publishing every change on the way.
    pub async fn reconcile(
        &self,
        watch: &AccountWatch,
        hint: HistoryCursor,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let result = self.run_pass(watch, hint).await;
        let outcome = match &result {
            Ok(outcome) if outcome.is_noop() => "noop",
            Ok(_) => "applied",
            Err(ReconcileError::StaleCursor { .. }) => "stale_cursor",
            Err(_) => "failed",
        };
        // Exporter failures must not fail the pass.
        let _ = self.metrics.record_reconcile(outcome).await;
        result
    }

    async fn run_pass(
        &self,
        watch: &AccountWatch,
        hint: HistoryCursor,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let last_cursor = self
            .cursors
            .load(&watch.account_id)
            .await?
            .map_or(watch.provider_cursor, |stored| stored.last_cursor);

        if hint <= last_cursor {
            debug!(account_id = %watch.account_id, %hint, %last_cursor, "hint already reconciled");
            return Ok(ReconcileOutcome {
                applied_changes: 0,
                previous_cursor: last_cursor,
                new_cursor: last_cursor,
                pages: 0,
            });
        }

        let mut highest = last_cursor;
        let mut applied_changes = 0_usize;
        let mut pages = 0_u32;
        let mut page_token: Option<String> = None;
        let mut issued_tokens: HashSet<String> = HashSet::new();

        loop {
            let query = HistoryQuery {
                start: last_cursor,
                page_token: page_token.clone(),
            };
            let page = self
                .provider
                .list_history(&watch.mailbox_address, &query)
                .await
                .map_err(|error| ReconcileError::from_provider(error, last_cursor))?;
            pages += 1;

            highest = highest.max(page.history_id);
            if let Some(record_max) = page.records.iter().map(|record| record.id).max() {
                highest = highest.max(record_max);
            }
            applied_changes += self.apply_page(watch, &page, last_cursor).await?;

            match page.next_page_token {
                Some(next) if !issued_tokens.insert(next.clone()) => {
                    warn!(account_id = %watch.account_id, pages, "provider repeated a page token");
                    return Err(ReconcileError::PaginationLoop { token: next });
                }
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        self.cursors.advance(&watch.account_id, highest).await?;
        info!(
            account_id = %watch.account_id,
            previous = %last_cursor,
            current = %highest,
            applied_changes,
            pages,
            "reconciliation pass complete"
        );

        Ok(ReconcileOutcome {
            applied_changes,
            previous_cursor: last_cursor,
            new_cursor: highest,
            pages,
        })
    }

    async fn apply_page(
        &self,
        watch: &AccountWatch,
        page: &HistoryPage,
        start: HistoryCursor,
    ) -> Result<usize, ReconcileError> {
        let classified = classify_page(&page.records);
        if classified.is_empty() {
            return Ok(0);
        }

        let to_fetch: Vec<MessageId> = classified
            .iter()
            .filter(|(_, change)| *change != PageChange::Deleted)
            .map(|(id, _)| id.clone())
            .collect();
        let mut fetched: HashMap<MessageId, MessageMetadata> = if to_fetch.is_empty() {
            HashMap::new()
        } else {
            self.provider
                .batch_get_messages(&watch.mailbox_address, &to_fetch)
                .await
                .map_err(|error| ReconcileError::from_provider(error, start))?
                .into_iter()
                .map(|message| (message.id.clone(), message))
                .collect()
        };

        for (id, change) in &classified {
            let now = self.clock.utc();
            let metadata = match change {
                PageChange::Deleted => None,
                PageChange::Added | PageChange::Modified => fetched.remove(id),
            };
            let event = match (change, metadata) {
                (PageChange::Added, Some(message)) => ChangeEvent::message(
                    watch.user_id.clone(),
                    ChangeKind::Created,
                    &watch.account_id,
                    &message,
                    now,
                ),
                (PageChange::Modified, Some(message)) => ChangeEvent::message(
                    watch.user_id.clone(),
                    ChangeKind::Updated,
                    &watch.account_id,
                    &message,
                    now,
                ),
                // Ids the batch no longer returns were removed after the record.
                _ => ChangeEvent::deleted(watch.user_id.clone(), &watch.account_id, id, now),
            };
            self.publisher.publish(&event).await;
        }

        Ok(classified.len())
    }

    /// Move the watermark to the provider's current cursor and tell clients to reload.
    ///
    /// Used after [`ReconcileError::StaleCursor`]; callers hold the account lock.
    pub async fn rebase(&self, watch: &AccountWatch) -> Result<HistoryCursor, ReconcileError> {
        let current = self
            .provider
            .current_cursor(&watch.mailbox_address)
            .await
            .map_err(ReconcileError::Upstream)?;
        self.cursors.reset(&watch.account_id, current).await?;
        warn!(account_id = %watch.account_id, cursor = %current, "watermark rebased; clients must resync");

        let event = ChangeEvent::sync_complete(
            watch.user_id.clone(),
            &watch.account_id,
            current,
            SyncStatus::Rebased,
            self.clock.utc(),
        );
        self.publisher.publish(&event).await;
        let _ = self.metrics.record_reconcile("rebased").await;
        Ok(current)
    }
}

#[cfg(test)]
mod tests;
