//! Composition root shared by the server and the ops CLI.
//!
//! [`connect_adapters`] picks concrete adapters from a [`RuntimeConfig`]:
//! Redis for the lock, dedupe and broker ports when a Redis URL is set,
//! PostgreSQL for watches and cursors when a database URL is set, and the
//! in-process adapters otherwise. [`Pipeline::assemble`] then wires the
//! domain services on top of whatever adapters it is handed, which is also
//! how tests build the pipeline from doubles.

use std::sync::Arc;
use std::time::Duration;

use mockable::{Clock, DefaultClock};
use tracing::{info, warn};

use crate::domain::ports::{
    AccountWatchRepository, DeliveryDedupe, DistributedLock, EventBroker, MailProvider,
    PushTokenVerifier, SyncCursorRepository, SyncMetrics,
};
use crate::domain::{
    AccountLock, AccountWatchService, EventPublisher, HistoryReconciler, PushAuthenticator,
    PushNotificationPorts, PushNotificationService, PushProcessingConfig, ResilienceConfig,
    ResilientMailProvider, SlidingWindowLimiter, UpstreamHealthReporter, WatchServicePorts,
};
use crate::inbound::http::state::{HttpState, HttpStatePorts, StreamSettings};
use crate::outbound::memory::{
    InMemoryAccountWatchRepository, InMemoryDeliveryDedupe, InMemoryEventBroker,
    InMemoryLockStore, InMemorySyncCursorRepository,
};
use crate::outbound::persistence::{
    DbPool, DieselAccountWatchRepository, DieselSyncCursorRepository, PoolConfig, PoolError,
    run_migrations,
};
use crate::outbound::provider::HttpMailProvider;
use crate::outbound::push_auth::{HttpJwksSource, JwksVerifier, JwksVerifierConfig};
use crate::outbound::redis::{
    RedisDeliveryDedupe, RedisEventBroker, RedisLockStore, RedisPool, RedisPoolError,
};
use crate::settings::{PushAuthSettings, RuntimeConfig};

const REDIS_POOL_SIZE: u32 = 16;
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PROVIDER_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(30);
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures while connecting adapters at startup.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Redis(#[from] RedisPoolError),
    #[error(transparent)]
    Database(#[from] PoolError),
    #[error("failed to build HTTP client for {component}: {source}")]
    HttpClient {
        component: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// Concrete adapters behind every port the pipeline uses.
#[derive(Clone)]
pub struct PipelineAdapters {
    /// Provider client, already wrapped by the resilience layer.
    pub provider: Arc<dyn MailProvider>,
    pub upstream: Arc<dyn UpstreamHealthReporter>,
    pub watches: Arc<dyn AccountWatchRepository>,
    pub cursors: Arc<dyn SyncCursorRepository>,
    pub lock_store: Arc<dyn DistributedLock>,
    pub dedupe: Arc<dyn DeliveryDedupe>,
    pub broker: Arc<dyn EventBroker>,
    pub metrics: Arc<dyn SyncMetrics>,
    pub clock: Arc<dyn Clock>,
}

impl PipelineAdapters {
    /// In-process adapters around `provider`.
    ///
    /// `provider` is wrapped in [`ResilientMailProvider`] here so the upstream
    /// health endpoint reports real counters.
    pub fn in_memory(
        provider: Arc<dyn MailProvider>,
        metrics: Arc<dyn SyncMetrics>,
        clock: Arc<dyn Clock>,
        resilience: ResilienceConfig,
    ) -> Self {
        let resilient = Arc::new(ResilientMailProvider::new(
            provider,
            clock.clone(),
            resilience,
        ));
        Self {
            provider: resilient.clone(),
            upstream: resilient,
            watches: Arc::new(InMemoryAccountWatchRepository::default()),
            cursors: Arc::new(InMemorySyncCursorRepository::new(clock.clone())),
            lock_store: Arc::new(InMemoryLockStore::new(clock.clone())),
            dedupe: Arc::new(InMemoryDeliveryDedupe::new(clock.clone())),
            broker: Arc::new(InMemoryEventBroker::default()),
            metrics,
            clock,
        }
    }
}

/// Pipeline tuning taken from [`RuntimeConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub lock_ttl: Duration,
    pub processing: PushProcessingConfig,
    /// Pub/sub topic passed to the provider when registering watches.
    pub push_topic: String,
}

impl From<&RuntimeConfig> for PipelineSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            lock_ttl: config.lock_ttl,
            processing: config.processing,
            push_topic: config.push_topic.clone(),
        }
    }
}

/// Wired domain services.
#[derive(Clone)]
pub struct Pipeline {
    pub push: Arc<PushNotificationService>,
    pub watch_service: Arc<AccountWatchService>,
    pub publisher: Arc<EventPublisher>,
    pub broker: Arc<dyn EventBroker>,
    pub upstream: Arc<dyn UpstreamHealthReporter>,
    pub clock: Arc<dyn Clock>,
}

impl Pipeline {
    /// Wire the domain services over `adapters`.
    pub fn assemble(adapters: PipelineAdapters, settings: &PipelineSettings) -> Self {
        let PipelineAdapters {
            provider,
            upstream,
            watches,
            cursors,
            lock_store,
            dedupe,
            broker,
            metrics,
            clock,
        } = adapters;

        let publisher = Arc::new(EventPublisher::new(broker.clone(), metrics.clone()));
        let reconciler = Arc::new(HistoryReconciler::new(
            provider.clone(),
            cursors.clone(),
            publisher.clone(),
            metrics.clone(),
            clock.clone(),
        ));
        let push = Arc::new(PushNotificationService::new(
            PushNotificationPorts {
                dedupe,
                watches: watches.clone(),
                metrics,
            },
            AccountLock::new(lock_store.clone(), settings.lock_ttl),
            reconciler.clone(),
            publisher.clone(),
            clock.clone(),
            settings.processing,
        ));
        let watch_service = Arc::new(AccountWatchService::new(
            WatchServicePorts {
                provider,
                watches,
                cursors,
            },
            AccountLock::new(lock_store, settings.lock_ttl),
            reconciler,
            clock.clone(),
            settings.push_topic.clone(),
        ));

        Self {
            push,
            watch_service,
            publisher,
            broker,
            upstream,
            clock,
        }
    }

    /// HTTP adapter state over this pipeline.
    pub fn http_state(
        &self,
        authenticator: Arc<PushAuthenticator>,
        limiter: Arc<SlidingWindowLimiter>,
        stream: StreamSettings,
    ) -> HttpState {
        HttpState::new(
            HttpStatePorts {
                push: self.push.clone(),
                authenticator,
                limiter,
                broker: self.broker.clone(),
                upstream: self.upstream.clone(),
                clock: self.clock.clone(),
            },
            stream,
        )
    }
}

/// Connect the adapters selected by `config`.
///
/// # Errors
///
/// Fails when Redis or PostgreSQL is configured but unreachable, when
/// migrations fail, or when the provider HTTP client cannot be built.
pub async fn connect_adapters(
    config: &RuntimeConfig,
    metrics: Arc<dyn SyncMetrics>,
) -> Result<PipelineAdapters, BootstrapError> {
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);

    let http = HttpMailProvider::new(
        config.provider.base_url.clone(),
        config.provider.access_token.as_str(),
        PROVIDER_TRANSPORT_TIMEOUT,
    )
    .map_err(|source| BootstrapError::HttpClient {
        component: "mail provider",
        source,
    })?;
    let resilient = Arc::new(ResilientMailProvider::new(
        Arc::new(http),
        clock.clone(),
        config.resilience.clone(),
    ));

    let (lock_store, dedupe, broker) = connect_coordination(config, &clock).await?;
    let (watches, cursors) = connect_storage(config, &clock).await?;

    Ok(PipelineAdapters {
        provider: resilient.clone(),
        upstream: resilient,
        watches,
        cursors,
        lock_store,
        dedupe,
        broker,
        metrics,
        clock,
    })
}

type CoordinationAdapters = (
    Arc<dyn DistributedLock>,
    Arc<dyn DeliveryDedupe>,
    Arc<dyn EventBroker>,
);

async fn connect_coordination(
    config: &RuntimeConfig,
    clock: &Arc<dyn Clock>,
) -> Result<CoordinationAdapters, BootstrapError> {
    match config.redis_url.as_deref() {
        Some(url) => {
            let pool = RedisPool::connect(url, REDIS_POOL_SIZE, REDIS_CONNECT_TIMEOUT).await?;
            info!("using redis for locks, dedupe and fan-out");
            Ok((
                Arc::new(RedisLockStore::new(pool.clone())),
                Arc::new(RedisDeliveryDedupe::new(pool.clone())),
                Arc::new(RedisEventBroker::new(pool)),
            ))
        }
        None => {
            warn!("no redis configured; locks, dedupe and fan-out are process-local");
            Ok((
                Arc::new(InMemoryLockStore::new(clock.clone())),
                Arc::new(InMemoryDeliveryDedupe::new(clock.clone())),
                Arc::new(InMemoryEventBroker::default()),
            ))
        }
    }
}

type StorageAdapters = (
    Arc<dyn AccountWatchRepository>,
    Arc<dyn SyncCursorRepository>,
);

async fn connect_storage(
    config: &RuntimeConfig,
    clock: &Arc<dyn Clock>,
) -> Result<StorageAdapters, BootstrapError> {
    match config.database_url.as_deref() {
        Some(url) => {
            run_migrations(url).await?;
            let pool = DbPool::new(PoolConfig::new(url)).await?;
            info!("using postgres for watches and cursors");
            Ok((
                Arc::new(DieselAccountWatchRepository::new(pool.clone(), clock.clone())),
                Arc::new(DieselSyncCursorRepository::new(pool, clock.clone())),
            ))
        }
        None => {
            warn!("no database configured; watches and cursors are not persisted");
            Ok((
                Arc::new(InMemoryAccountWatchRepository::default()),
                Arc::new(InMemorySyncCursorRepository::new(clock.clone())),
            ))
        }
    }
}

/// Build the webhook authenticator for the configured mechanisms.
///
/// # Errors
///
/// Fails when the key set HTTP client cannot be built.
pub fn push_authenticator(
    settings: &PushAuthSettings,
    clock: Arc<dyn Clock>,
) -> Result<PushAuthenticator, BootstrapError> {
    let verifier = match settings.audience.as_deref() {
        Some(audience) => {
            let source = HttpJwksSource::new(settings.jwks_url.clone(), JWKS_FETCH_TIMEOUT)
                .map_err(|source| BootstrapError::HttpClient {
                    component: "push key set",
                    source,
                })?;
            let verifier: Arc<dyn PushTokenVerifier> = Arc::new(JwksVerifier::new(
                Arc::new(source),
                clock,
                JwksVerifierConfig::for_audience(audience),
            ));
            Some(verifier)
        }
        None => None,
    };
    Ok(PushAuthenticator::new(
        verifier,
        settings.verification_token.clone(),
        settings.service_account.clone(),
    ))
}
