//! Unit tests for history reconciliation passes.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use mockall::predicate::eq;
use rstest::{fixture, rstest};

use super::{HistoryReconciler, ReconcileError};
use crate::domain::ports::{
    HistoryChange, MailProviderError, MockSyncCursorRepository, NoOpSyncMetrics,
    SyncCursorRepositoryError,
};
use crate::domain::{
    AccountId, AccountWatch, ChangeKind, EventPublisher, HistoryCursor, MailboxAddress,
    SyncCursor, UserId,
};
use crate::test_support::provider::{FakeMailProvider, RecordingBroker, message_id, page};
use crate::test_support::resilience::MutableClock;

const TOPIC: &str = "user:user-1:updates";

#[fixture]
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

#[fixture]
fn watch(now: DateTime<Utc>) -> AccountWatch {
    AccountWatch {
        account_id: AccountId::new("acct-1").expect("valid account"),
        user_id: UserId::new("user-1").expect("valid user"),
        mailbox_address: MailboxAddress::new("ada@example.com").expect("valid mailbox"),
        provider_cursor: HistoryCursor::new(50),
        expires_at: now,
    }
}

fn stored(cursor: u64, now: DateTime<Utc>) -> MockSyncCursorRepository {
    let mut cursors = MockSyncCursorRepository::new();
    cursors.expect_load().returning(move |account_id| {
        Ok(Some(SyncCursor {
            account_id: account_id.clone(),
            last_cursor: HistoryCursor::new(cursor),
            updated_at: now,
        }))
    });
    cursors
}

struct Harness {
    reconciler: HistoryReconciler,
    provider: Arc<FakeMailProvider>,
    broker: Arc<RecordingBroker>,
}

fn harness(provider: FakeMailProvider, cursors: MockSyncCursorRepository, now: DateTime<Utc>) -> Harness {
    let provider = Arc::new(provider);
    let broker = Arc::new(RecordingBroker::default());
    let publisher = Arc::new(EventPublisher::new(
        Arc::clone(&broker) as _,
        Arc::new(NoOpSyncMetrics),
    ));
    let reconciler = HistoryReconciler::new(
        Arc::clone(&provider) as _,
        Arc::new(cursors),
        publisher,
        Arc::new(NoOpSyncMetrics),
        Arc::new(MutableClock::new(now)),
    );
    Harness {
        reconciler,
        provider,
        broker,
    }
}

#[rstest]
#[case(100)]
#[case(99)]
#[tokio::test]
async fn covered_hint_makes_no_upstream_calls(
    #[case] hint: u64,
    watch: AccountWatch,
    now: DateTime<Utc>,
) {
    let mut cursors = stored(100, now);
    cursors.expect_advance().never();
    let h = harness(FakeMailProvider::new(HistoryCursor::new(100), now), cursors, now);

    let outcome = h
        .reconciler
        .reconcile(&watch, HistoryCursor::new(hint))
        .await
        .expect("noop");

    assert!(outcome.is_noop());
    assert_eq!(outcome.new_cursor, HistoryCursor::new(100));
    assert_eq!(h.provider.history_calls(), 0);
    assert_eq!(h.broker.published_count(), 0);
}

#[rstest]
#[tokio::test]
async fn two_pages_publish_in_order_then_advance(watch: AccountWatch, now: DateTime<Utc>) {
    let provider = FakeMailProvider::new(HistoryCursor::new(105), now)
        .with_page(
            100,
            None,
            page(103, Some("p2"), vec![
                (101, vec![HistoryChange::MessageAdded(message_id("m1"))]),
                (102, vec![HistoryChange::MessageAdded(message_id("m2"))]),
            ]),
        )
        .with_page(
            100,
            Some("p2"),
            page(105, None, vec![
                (104, vec![HistoryChange::MessageAdded(message_id("m3"))]),
                (105, vec![HistoryChange::MessageDeleted(message_id("m0"))]),
            ]),
        )
        .with_message("m1", 101)
        .with_message("m2", 102)
        .with_message("m3", 104);
    let mut cursors = stored(100, now);
    cursors
        .expect_advance()
        .with(eq(watch.account_id.clone()), eq(HistoryCursor::new(105)))
        .times(1)
        .returning(|_, _| Ok(()));
    let h = harness(provider, cursors, now);

    let outcome = h
        .reconciler
        .reconcile(&watch, HistoryCursor::new(105))
        .await
        .expect("applied");

    assert_eq!(outcome.applied_changes, 4);
    assert_eq!(outcome.previous_cursor, HistoryCursor::new(100));
    assert_eq!(outcome.new_cursor, HistoryCursor::new(105));
    assert_eq!(outcome.pages, 2);
    assert_eq!(h.provider.batch_calls(), 2);

    let events = h.broker.events_for(TOPIC);
    let summary: Vec<(ChangeKind, String)> = events
        .iter()
        .map(|event| (event.kind, event.data["messageId"].as_str().unwrap_or_default().to_owned()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (ChangeKind::Created, "m1".to_owned()),
            (ChangeKind::Created, "m2".to_owned()),
            (ChangeKind::Created, "m3".to_owned()),
            (ChangeKind::Deleted, "m0".to_owned()),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn missing_batch_entries_become_deletions(watch: AccountWatch, now: DateTime<Utc>) {
    let provider = FakeMailProvider::new(HistoryCursor::new(102), now)
        .with_page(
            100,
            None,
            page(102, None, vec![(101, vec![
                HistoryChange::LabelsAdded(message_id("kept")),
                HistoryChange::MessageAdded(message_id("vanished")),
            ])]),
        )
        .with_message("kept", 101);
    let mut cursors = stored(100, now);
    cursors.expect_advance().times(1).returning(|_, _| Ok(()));
    let h = harness(provider, cursors, now);

    h.reconciler
        .reconcile(&watch, HistoryCursor::new(102))
        .await
        .expect("applied");

    let kinds: Vec<ChangeKind> = h.broker.events_for(TOPIC).iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ChangeKind::Updated, ChangeKind::Deleted]);
}

#[rstest]
#[tokio::test]
async fn falls_back_to_watch_cursor_without_stored_watermark(
    watch: AccountWatch,
    now: DateTime<Utc>,
) {
    let provider = FakeMailProvider::new(HistoryCursor::new(60), now)
        .with_page(50, None, page(60, None, Vec::new()));
    let mut cursors = MockSyncCursorRepository::new();
    cursors.expect_load().returning(|_| Ok(None));
    cursors
        .expect_advance()
        .with(eq(watch.account_id.clone()), eq(HistoryCursor::new(60)))
        .times(1)
        .returning(|_, _| Ok(()));
    let h = harness(provider, cursors, now);

    let outcome = h
        .reconciler
        .reconcile(&watch, HistoryCursor::new(60))
        .await
        .expect("applied");

    assert_eq!(outcome.previous_cursor, HistoryCursor::new(50));
    assert_eq!(outcome.applied_changes, 0);
}

#[rstest]
#[tokio::test]
async fn stale_cursor_is_reported_without_advancing(watch: AccountWatch, now: DateTime<Utc>) {
    let provider = FakeMailProvider::new(HistoryCursor::new(900), now);
    provider.fail_next_history(MailProviderError::stale_cursor("history expired"));
    let mut cursors = stored(100, now);
    cursors.expect_advance().never();
    let h = harness(provider, cursors, now);

    let error = h
        .reconciler
        .reconcile(&watch, HistoryCursor::new(200))
        .await
        .expect_err("stale");

    assert_eq!(
        error,
        ReconcileError::StaleCursor {
            cursor: HistoryCursor::new(100)
        }
    );
    assert!(!error.is_transient());
}

#[rstest]
#[tokio::test]
async fn upstream_failure_on_second_page_keeps_watermark(watch: AccountWatch, now: DateTime<Utc>) {
    let provider = FakeMailProvider::new(HistoryCursor::new(105), now)
        .with_page(
            100,
            None,
            page(103, Some("p2"), vec![(101, vec![HistoryChange::MessageDeleted(message_id("m1"))])]),
        )
        .with_page_error(100, Some("p2"), MailProviderError::server(503_u16, "unavailable"));
    let mut cursors = stored(100, now);
    cursors.expect_advance().never();
    let h = harness(provider, cursors, now);

    let error = h
        .reconciler
        .reconcile(&watch, HistoryCursor::new(105))
        .await
        .expect_err("second page fails");

    assert!(matches!(
        error,
        ReconcileError::Upstream(MailProviderError::Server { status: 503, .. })
    ));
    assert!(error.is_transient());
    // Events from the first page were already delivered; replay is idempotent.
    assert_eq!(h.broker.events_for(TOPIC).len(), 1);
}

#[rstest]
#[tokio::test]
async fn repeated_page_token_fails_instead_of_looping(watch: AccountWatch, now: DateTime<Utc>) {
    let provider = FakeMailProvider::new(HistoryCursor::new(105), now)
        .with_page(100, None, page(101, Some("again"), Vec::new()))
        .with_page(100, Some("again"), page(101, Some("again"), Vec::new()));
    let mut cursors = stored(100, now);
    cursors.expect_advance().never();
    let h = harness(provider, cursors, now);

    let error = h
        .reconciler
        .reconcile(&watch, HistoryCursor::new(105))
        .await
        .expect_err("loop");

    assert_eq!(
        error,
        ReconcileError::PaginationLoop {
            token: "again".to_owned()
        }
    );
    assert!(error.is_transient());
    assert_eq!(h.provider.history_calls(), 2);
}

#[rstest]
#[tokio::test]
async fn cursor_store_failure_surfaces(watch: AccountWatch, now: DateTime<Utc>) {
    let mut cursors = MockSyncCursorRepository::new();
    cursors
        .expect_load()
        .returning(|_| Err(SyncCursorRepositoryError::connection("pool exhausted")));
    let h = harness(FakeMailProvider::new(HistoryCursor::new(1), now), cursors, now);

    let error = h
        .reconciler
        .reconcile(&watch, HistoryCursor::new(105))
        .await
        .expect_err("store down");

    assert!(matches!(error, ReconcileError::CursorStore(_)));
}

#[rstest]
#[tokio::test]
async fn rebase_resets_watermark_and_announces_full_resync(
    watch: AccountWatch,
    now: DateTime<Utc>,
) {
    let mut cursors = MockSyncCursorRepository::new();
    cursors
        .expect_reset()
        .with(eq(watch.account_id.clone()), eq(HistoryCursor::new(900)))
        .times(1)
        .returning(|_, _| Ok(()));
    let h = harness(FakeMailProvider::new(HistoryCursor::new(900), now), cursors, now);

    let cursor = h.reconciler.rebase(&watch).await.expect("rebased");

    assert_eq!(cursor, HistoryCursor::new(900));
    let events = h.broker.events_for(TOPIC);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::SyncComplete);
    assert_eq!(events[0].data["status"], "rebased");
    assert_eq!(events[0].data["fullResync"], true);
}
