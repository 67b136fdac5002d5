//! Unit tests for the resilient provider decorator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rstest::{fixture, rstest};
use tokio::sync::{Notify, mpsc};

use super::{
    BreakerConfig, BreakerState, ResilienceConfig, ResilienceRuntime, ResilientMailProvider,
    UpstreamHealthReporter,
};
use crate::domain::ports::{
    HistoryPage, HistoryQuery, MailProvider, MailProviderError, MessageMetadata,
    WatchRegistration,
};
use crate::domain::{HistoryCursor, MailboxAddress, MessageId};
use crate::test_support::resilience::{MutableClock, NoJitter, RecordingSleeper};

type CursorResult = Result<HistoryCursor, MailProviderError>;

struct CursorStub {
    scripted: Mutex<VecDeque<CursorResult>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    entered: Option<mpsc::UnboundedSender<usize>>,
    release: Option<Arc<Notify>>,
    stall: Option<Duration>,
}

impl CursorStub {
    fn scripted(scripted: Vec<CursorResult>) -> Self {
        Self {
            scripted: Mutex::new(scripted.into()),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            entered: None,
            release: None,
            stall: None,
        }
    }

    fn blocking(
        scripted: Vec<CursorResult>,
        entered: mpsc::UnboundedSender<usize>,
        release: Arc<Notify>,
    ) -> Self {
        Self {
            entered: Some(entered),
            release: Some(release),
            ..Self::scripted(scripted)
        }
    }

    fn stalling(stall: Duration) -> Self {
        Self {
            stall: Some(stall),
            ..Self::scripted(Vec::new())
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailProvider for CursorStub {
    async fn list_history(
        &self,
        _mailbox: &MailboxAddress,
        _query: &HistoryQuery,
    ) -> Result<HistoryPage, MailProviderError> {
        Err(MailProviderError::invalid_request("not scripted"))
    }

    async fn get_message(
        &self,
        _mailbox: &MailboxAddress,
        _id: &MessageId,
    ) -> Result<MessageMetadata, MailProviderError> {
        Err(MailProviderError::invalid_request("not scripted"))
    }

    async fn batch_get_messages(
        &self,
        _mailbox: &MailboxAddress,
        _ids: &[MessageId],
    ) -> Result<Vec<MessageMetadata>, MailProviderError> {
        Err(MailProviderError::invalid_request("not scripted"))
    }

    async fn current_cursor(&self, _mailbox: &MailboxAddress) -> CursorResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active_now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active_now, Ordering::SeqCst);
        if let Some(entered) = &self.entered {
            entered.send(active_now).expect("send entry");
        }
        if let Some(release) = &self.release {
            release.notified().await;
        }
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.scripted
            .lock()
            .expect("script mutex")
            .pop_front()
            .unwrap_or_else(|| Ok(HistoryCursor::new(1)))
    }

    async fn register_watch(
        &self,
        _mailbox: &MailboxAddress,
        _topic: &str,
    ) -> Result<WatchRegistration, MailProviderError> {
        Err(MailProviderError::invalid_request("not scripted"))
    }

    async fn deregister_watch(&self, _mailbox: &MailboxAddress) -> Result<(), MailProviderError> {
        Err(MailProviderError::invalid_request("not scripted"))
    }
}

#[fixture]
fn clock() -> Arc<MutableClock> {
    Arc::new(MutableClock::new(
        Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp"),
    ))
}

#[fixture]
fn mailbox() -> MailboxAddress {
    MailboxAddress::new("ada@example.com").expect("valid mailbox")
}

fn config() -> ResilienceConfig {
    ResilienceConfig {
        max_concurrent_calls: 2,
        call_timeout: Duration::from_secs(15),
        max_retries: 3,
        initial_backoff: Duration::from_millis(500),
        max_backoff: Duration::from_secs(10),
        breaker: BreakerConfig {
            error_rate_threshold_percent: 50,
            min_volume: 2,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        },
    }
}

fn build(
    stub: Arc<CursorStub>,
    clock: Arc<MutableClock>,
    sleeper: Arc<RecordingSleeper>,
    config: ResilienceConfig,
) -> ResilientMailProvider {
    ResilientMailProvider::with_runtime(
        stub,
        clock,
        ResilienceRuntime {
            sleeper,
            jitter: Arc::new(NoJitter),
        },
        config,
    )
}

#[rstest]
#[tokio::test]
async fn rate_limited_calls_back_off_exponentially(
    clock: Arc<MutableClock>,
    mailbox: MailboxAddress,
) {
    let stub = Arc::new(CursorStub::scripted(vec![
        Err(MailProviderError::rate_limited("quota", None::<Duration>)),
        Err(MailProviderError::rate_limited("quota", None::<Duration>)),
        Ok(HistoryCursor::new(77)),
    ]));
    let sleeper = Arc::new(RecordingSleeper::default());
    let mut config = config();
    config.breaker.min_volume = 10;
    let provider = build(Arc::clone(&stub), clock, Arc::clone(&sleeper), config);

    let cursor = provider.current_cursor(&mailbox).await.expect("eventual success");

    assert_eq!(cursor, HistoryCursor::new(77));
    assert_eq!(stub.calls(), 3);
    assert_eq!(
        sleeper.recorded(),
        vec![Duration::from_millis(500), Duration::from_millis(1_000)]
    );
}

#[rstest]
#[tokio::test]
async fn retry_hint_overrides_backoff(clock: Arc<MutableClock>, mailbox: MailboxAddress) {
    let stub = Arc::new(CursorStub::scripted(vec![
        Err(MailProviderError::rate_limited(
            "quota",
            Some(Duration::from_secs(4)),
        )),
        Ok(HistoryCursor::new(5)),
    ]));
    let sleeper = Arc::new(RecordingSleeper::default());
    let provider = build(Arc::clone(&stub), clock, Arc::clone(&sleeper), config());

    provider.current_cursor(&mailbox).await.expect("success");

    assert_eq!(sleeper.recorded(), vec![Duration::from_secs(4)]);
}

#[rstest]
#[tokio::test]
async fn retries_stop_after_configured_limit(clock: Arc<MutableClock>, mailbox: MailboxAddress) {
    let stub = Arc::new(CursorStub::scripted(
        (0..10)
            .map(|_| Err(MailProviderError::rate_limited("quota", None::<Duration>)))
            .collect(),
    ));
    let sleeper = Arc::new(RecordingSleeper::default());
    let mut config = config();
    config.breaker.min_volume = 100;
    let provider = build(Arc::clone(&stub), clock, Arc::clone(&sleeper), config);

    let error = provider
        .current_cursor(&mailbox)
        .await
        .expect_err("retries exhausted");

    assert!(matches!(error, MailProviderError::RateLimited { .. }));
    assert_eq!(stub.calls(), 4);
    assert_eq!(sleeper.recorded().len(), 3);
}

#[rstest]
#[tokio::test]
async fn server_errors_are_not_retried(clock: Arc<MutableClock>, mailbox: MailboxAddress) {
    let stub = Arc::new(CursorStub::scripted(vec![Err(MailProviderError::server(
        502_u16, "bad gateway",
    ))]));
    let sleeper = Arc::new(RecordingSleeper::default());
    let provider = build(Arc::clone(&stub), clock, Arc::clone(&sleeper), config());

    let error = provider.current_cursor(&mailbox).await.expect_err("fails");

    assert!(matches!(error, MailProviderError::Server { status: 502, .. }));
    assert_eq!(stub.calls(), 1);
    assert!(sleeper.recorded().is_empty());
}

#[rstest]
#[tokio::test]
async fn open_breaker_fails_fast_then_recovers(clock: Arc<MutableClock>, mailbox: MailboxAddress) {
    let stub = Arc::new(CursorStub::scripted(vec![
        Err(MailProviderError::transport("reset")),
        Err(MailProviderError::transport("reset")),
        Ok(HistoryCursor::new(9)),
    ]));
    let sleeper = Arc::new(RecordingSleeper::default());
    let provider = build(
        Arc::clone(&stub),
        Arc::clone(&clock),
        sleeper,
        config(),
    );

    for _ in 0..2 {
        provider.current_cursor(&mailbox).await.expect_err("transport");
    }
    let rejected = provider.current_cursor(&mailbox).await.expect_err("open");
    assert!(matches!(rejected, MailProviderError::CircuitOpen { .. }));
    assert_eq!(stub.calls(), 2);

    let health = provider.upstream_health();
    assert_eq!(health.breaker_state, BreakerState::Open);
    assert_eq!(health.rejected, 1);
    assert_eq!(health.failed, 2);

    clock.advance_seconds(30);
    let cursor = provider.current_cursor(&mailbox).await.expect("probe");
    assert_eq!(cursor, HistoryCursor::new(9));
    assert_eq!(provider.upstream_health().breaker_state, BreakerState::Closed);
}

#[rstest]
#[tokio::test]
async fn definitive_answers_do_not_trip_breaker(clock: Arc<MutableClock>, mailbox: MailboxAddress) {
    let stub = Arc::new(CursorStub::scripted(vec![
        Err(MailProviderError::not_found("gone")),
        Err(MailProviderError::stale_cursor("expired")),
        Err(MailProviderError::not_found("gone")),
    ]));
    let provider = build(
        Arc::clone(&stub),
        clock,
        Arc::new(RecordingSleeper::default()),
        config(),
    );

    for _ in 0..3 {
        provider.current_cursor(&mailbox).await.expect_err("definitive");
    }

    assert_eq!(provider.upstream_health().breaker_state, BreakerState::Closed);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn slow_calls_time_out(clock: Arc<MutableClock>, mailbox: MailboxAddress) {
    let stub = Arc::new(CursorStub::stalling(Duration::from_secs(20)));
    let provider = build(
        Arc::clone(&stub),
        clock,
        Arc::new(RecordingSleeper::default()),
        config(),
    );

    let error = provider.current_cursor(&mailbox).await.expect_err("timeout");

    assert!(matches!(error, MailProviderError::Timeout { .. }));
    let health = provider.upstream_health();
    assert_eq!(health.failed, 1);
    assert_eq!(health.in_flight, 0);
}

#[rstest]
#[tokio::test]
async fn concurrency_is_capped_and_queue_depth_reported(
    clock: Arc<MutableClock>,
    mailbox: MailboxAddress,
) {
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let release = Arc::new(Notify::new());
    let stub = Arc::new(CursorStub::blocking(
        Vec::new(),
        entered_tx,
        Arc::clone(&release),
    ));
    let provider = Arc::new(build(
        Arc::clone(&stub),
        clock,
        Arc::new(RecordingSleeper::default()),
        config(),
    ));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let provider = Arc::clone(&provider);
        let mailbox = mailbox.clone();
        handles.push(tokio::spawn(async move {
            provider.current_cursor(&mailbox).await
        }));
    }

    entered_rx.recv().await.expect("first entry");
    entered_rx.recv().await.expect("second entry");
    tokio::task::yield_now().await;

    let health = provider.upstream_health();
    assert_eq!(health.in_flight, 2);
    assert_eq!(health.queue_depth, 1);

    for _ in 0..3 {
        release.notify_one();
        // The third caller only enters after a permit frees up.
        let _ = tokio::time::timeout(Duration::from_millis(100), entered_rx.recv()).await;
    }
    for handle in handles {
        handle.await.expect("join").expect("cursor");
    }

    assert_eq!(stub.max_active.load(Ordering::SeqCst), 2);
    let health = provider.upstream_health();
    assert_eq!(health.completed, 3);
    assert_eq!(health.queue_depth, 0);
}
