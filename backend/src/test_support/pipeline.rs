//! Fully wired pipeline over in-process adapters and a scripted provider.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use super::provider::FakeMailProvider;
use super::resilience::{MutableClock, NoJitter, RecordingSleeper};
use crate::bootstrap::{Pipeline, PipelineAdapters, PipelineSettings};
use crate::domain::ports::{AccountWatchRepository, NoOpSyncMetrics, SyncCursorRepository};
use crate::domain::{
    AccountId, AccountWatch, HistoryCursor, MailboxAddress, PushAuthenticator,
    PushProcessingConfig, RateLimitConfig, ResilienceConfig, ResilienceRuntime,
    ResilientMailProvider, SlidingWindowLimiter, UserId,
};
use crate::inbound::http::state::{HttpState, StreamSettings};
use crate::outbound::memory::{
    InMemoryAccountWatchRepository, InMemoryDeliveryDedupe, InMemoryEventBroker,
    InMemoryLockStore, InMemorySyncCursorRepository,
};

/// Shared verification token accepted by [`TestPipeline::http_state`].
pub const SHARED_TOKEN: &str = "shared-verification-token";
/// Rate limit bypass secret accepted by [`TestPipeline::http_state`].
pub const BYPASS_TOKEN: &str = "rate-limit-bypass";

/// Fixed starting time for pipeline tests.
pub fn test_epoch() -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).single() {
        Some(now) => now,
        None => panic!("valid test epoch"),
    }
}

/// Pipeline plus handles on the adapters tests seed and inspect.
pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub provider: Arc<FakeMailProvider>,
    pub watches: Arc<InMemoryAccountWatchRepository>,
    pub cursors: Arc<InMemorySyncCursorRepository>,
    pub broker: Arc<InMemoryEventBroker>,
    pub clock: Arc<MutableClock>,
}

impl TestPipeline {
    /// Wire the pipeline around `provider`; retries never sleep.
    pub fn new(provider: FakeMailProvider) -> Self {
        let clock = Arc::new(MutableClock::new(test_epoch()));
        let provider = Arc::new(provider);
        let resilient = Arc::new(ResilientMailProvider::with_runtime(
            provider.clone(),
            clock.clone(),
            ResilienceRuntime {
                sleeper: Arc::new(RecordingSleeper::default()),
                jitter: Arc::new(NoJitter),
            },
            ResilienceConfig::default(),
        ));
        let watches = Arc::new(InMemoryAccountWatchRepository::default());
        let cursors = Arc::new(InMemorySyncCursorRepository::new(clock.clone()));
        let broker = Arc::new(InMemoryEventBroker::default());

        let pipeline = Pipeline::assemble(
            PipelineAdapters {
                provider: resilient.clone(),
                upstream: resilient,
                watches: watches.clone(),
                cursors: cursors.clone(),
                lock_store: Arc::new(InMemoryLockStore::new(clock.clone())),
                dedupe: Arc::new(InMemoryDeliveryDedupe::new(clock.clone())),
                broker: broker.clone(),
                metrics: Arc::new(NoOpSyncMetrics),
                clock: clock.clone(),
            },
            &PipelineSettings {
                lock_ttl: std::time::Duration::from_secs(300),
                processing: PushProcessingConfig::default(),
                push_topic: "projects/test/topics/mail".to_owned(),
            },
        );

        Self {
            pipeline,
            provider,
            watches,
            cursors,
            broker,
            clock,
        }
    }

    /// Seed a watch for `mailbox` owned by `user` with watermark `cursor`.
    pub async fn watch(&self, account: &str, user: &str, mailbox: &str, cursor: u64) {
        let watch = AccountWatch {
            account_id: parse(AccountId::new(account)),
            user_id: parse(UserId::new(user)),
            mailbox_address: parse(MailboxAddress::new(mailbox)),
            provider_cursor: HistoryCursor::new(cursor),
            expires_at: test_epoch() + chrono::Duration::days(7),
        };
        if let Err(error) = self.watches.upsert(&watch).await {
            panic!("seed watch: {error}");
        }
        if let Err(error) = self
            .cursors
            .advance(&watch.account_id, HistoryCursor::new(cursor))
            .await
        {
            panic!("seed cursor: {error}");
        }
    }

    /// Stored watermark for `account`.
    pub async fn cursor(&self, account: &str) -> Option<u64> {
        match self.cursors.load(&parse(AccountId::new(account))).await {
            Ok(cursor) => cursor.map(|stored| stored.last_cursor.value()),
            Err(error) => panic!("load cursor: {error}"),
        }
    }

    /// HTTP state accepting [`SHARED_TOKEN`] and bypassing limits for [`BYPASS_TOKEN`].
    pub fn http_state(&self, rate_limit: RateLimitConfig, stream: StreamSettings) -> HttpState {
        let authenticator = Arc::new(PushAuthenticator::new(
            None,
            Some(SHARED_TOKEN.to_owned()),
            None,
        ));
        let limiter = Arc::new(SlidingWindowLimiter::new(
            rate_limit,
            self.clock.clone(),
            Some(BYPASS_TOKEN.to_owned()),
        ));
        self.pipeline.http_state(authenticator, limiter, stream)
    }
}

fn parse<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => panic!("invalid test identifier: {error}"),
    }
}
