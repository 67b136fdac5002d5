//! Resilient decorator around the mail provider port.
//!
//! Every upstream call passes through a concurrency gate (semaphore), the
//! circuit breaker, and a per-call timeout. Rate-limited answers are retried
//! with jittered exponential backoff, honouring the provider's retry hint
//! when one is supplied. Counters feed the upstream health endpoint.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mockable::Clock;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::domain::ports::{
    HistoryPage, HistoryQuery, MailProvider, MailProviderError, MessageMetadata,
    WatchRegistration,
};
use crate::domain::{HistoryCursor, MailboxAddress, MessageId};

mod breaker;
mod retry;

use breaker::{Admission, CircuitBreaker, Transition};
pub use breaker::{BreakerConfig, BreakerState};
pub use retry::{BackoffJitter, RandomJitter, RetrySleeper, TokioSleeper};

/// Limits applied to every upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResilienceConfig {
    /// Concurrent upstream calls allowed before callers queue.
    pub max_concurrent_calls: usize,
    /// Timeout for a single attempt.
    pub call_timeout: Duration,
    /// Retries after the first attempt for rate-limited answers.
    pub max_retries: u32,
    /// First retry delay before jitter.
    pub initial_backoff: Duration,
    /// Upper bound on the exponential retry delay.
    pub max_backoff: Duration,
    /// Circuit breaker tuning.
    pub breaker: BreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 3,
            call_timeout: Duration::from_secs(15),
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Runtime helpers used by the retry policy.
pub struct ResilienceRuntime {
    /// Async sleep implementation.
    pub sleeper: Arc<dyn RetrySleeper>,
    /// Jitter strategy for retry delays.
    pub jitter: Arc<dyn BackoffJitter>,
}

impl Default for ResilienceRuntime {
    fn default() -> Self {
        Self {
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(RandomJitter),
        }
    }
}

/// Point-in-time view of the upstream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamHealth {
    /// Current breaker state.
    pub breaker_state: BreakerState,
    /// Callers waiting for a concurrency permit.
    pub queue_depth: usize,
    /// Calls currently executing upstream.
    pub in_flight: usize,
    /// Attempts that returned successfully.
    pub completed: u64,
    /// Attempts that returned an error (including timeouts).
    pub failed: u64,
    /// Attempts rejected by the open breaker.
    pub rejected: u64,
}

/// Read-only access to upstream health for the inbound adapter.
pub trait UpstreamHealthReporter: Send + Sync {
    /// Snapshot the client's counters and breaker state.
    fn upstream_health(&self) -> UpstreamHealth;
}

#[derive(Default)]
struct CallCounters {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Decrements a gauge when dropped so cancelled callers do not leak counts.
struct GaugeGuard<'a>(&'a AtomicUsize);

impl<'a> GaugeGuard<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mail provider wrapper enforcing concurrency, breaker, timeout and retry.
pub struct ResilientMailProvider {
    inner: Arc<dyn MailProvider>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn RetrySleeper>,
    jitter: Arc<dyn BackoffJitter>,
    call_semaphore: Semaphore,
    config: ResilienceConfig,
    breaker: Mutex<CircuitBreaker>,
    counters: CallCounters,
}

impl ResilientMailProvider {
    /// Wrap `inner` using the Tokio sleeper and random jitter.
    pub fn new(inner: Arc<dyn MailProvider>, clock: Arc<dyn Clock>, config: ResilienceConfig) -> Self {
        Self::with_runtime(inner, clock, ResilienceRuntime::default(), config)
    }

    /// Wrap `inner` with injected retry helpers.
    pub fn with_runtime(
        inner: Arc<dyn MailProvider>,
        clock: Arc<dyn Clock>,
        runtime: ResilienceRuntime,
        config: ResilienceConfig,
    ) -> Self {
        Self {
            inner,
            clock,
            sleeper: runtime.sleeper,
            jitter: runtime.jitter,
            call_semaphore: Semaphore::new(config.max_concurrent_calls.max(1)),
            breaker: Mutex::new(CircuitBreaker::new(config.breaker)),
            config,
            counters: CallCounters::default(),
        }
    }

    async fn execute<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, MailProviderError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, MailProviderError>> + Send,
        T: Send,
    {
        let mut attempt = 1_u32;
        loop {
            match self.attempt(operation, call()).await {
                Err(MailProviderError::RateLimited {
                    message,
                    retry_after,
                }) if attempt <= self.config.max_retries => {
                    let delay = retry_after.unwrap_or_else(|| self.backoff_delay(attempt));
                    debug!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        %message,
                        "upstream rate limited; retrying"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn attempt<T, Fut>(&self, operation: &'static str, call: Fut) -> Result<T, MailProviderError>
    where
        Fut: Future<Output = Result<T, MailProviderError>> + Send,
    {
        let _permit = {
            let _queued = GaugeGuard::enter(&self.counters.queued);
            self.call_semaphore
                .acquire()
                .await
                .map_err(|_| MailProviderError::transport("upstream call gate closed"))?
        };

        if self.lock_breaker().admit(self.clock.utc()) == Admission::Rejected {
            self.counters.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(MailProviderError::circuit_open(format!(
                "{operation} rejected while upstream is cooling down"
            )));
        }

        let result = {
            let _in_flight = GaugeGuard::enter(&self.counters.in_flight);
            match tokio::time::timeout(self.config.call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(MailProviderError::timeout(format!(
                    "{operation} exceeded {}ms",
                    self.config.call_timeout.as_millis()
                ))),
            }
        };

        let now = self.clock.utc();
        let transition = match &result {
            Err(error) if error.indicates_unhealthy_dependency() => {
                self.lock_breaker().record_failure(now)
            }
            _ => self.lock_breaker().record_success(now),
        };
        match transition {
            Transition::Opened => warn!(operation, "upstream circuit opened"),
            Transition::Closed => info!(operation, "upstream circuit closed after probe"),
            Transition::None => {}
        }

        let counter = if result.is_ok() {
            &self.counters.completed
        } else {
            &self.counters.failed
        };
        counter.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = retry::exponential_delay(self.config.initial_backoff, self.config.max_backoff, attempt);
        self.jitter.jittered_delay(base, attempt, self.clock.utc())
    }

    fn lock_breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        // Breaker updates cannot panic midway, so a poisoned guard is still consistent.
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UpstreamHealthReporter for ResilientMailProvider {
    fn upstream_health(&self) -> UpstreamHealth {
        UpstreamHealth {
            breaker_state: self.lock_breaker().state(),
            queue_depth: self.counters.queued.load(Ordering::SeqCst),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl MailProvider for ResilientMailProvider {
    async fn list_history(
        &self,
        mailbox: &MailboxAddress,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, MailProviderError> {
        self.execute("list_history", || self.inner.list_history(mailbox, query))
            .await
    }

    async fn get_message(
        &self,
        mailbox: &MailboxAddress,
        id: &MessageId,
    ) -> Result<MessageMetadata, MailProviderError> {
        self.execute("get_message", || self.inner.get_message(mailbox, id))
            .await
    }

    async fn batch_get_messages(
        &self,
        mailbox: &MailboxAddress,
        ids: &[MessageId],
    ) -> Result<Vec<MessageMetadata>, MailProviderError> {
        self.execute("batch_get_messages", || {
            self.inner.batch_get_messages(mailbox, ids)
        })
        .await
    }

    async fn current_cursor(
        &self,
        mailbox: &MailboxAddress,
    ) -> Result<HistoryCursor, MailProviderError> {
        self.execute("current_cursor", || self.inner.current_cursor(mailbox))
            .await
    }

    async fn register_watch(
        &self,
        mailbox: &MailboxAddress,
        topic: &str,
    ) -> Result<WatchRegistration, MailProviderError> {
        self.execute("register_watch", || self.inner.register_watch(mailbox, topic))
            .await
    }

    async fn deregister_watch(&self, mailbox: &MailboxAddress) -> Result<(), MailProviderError> {
        self.execute("deregister_watch", || self.inner.deregister_watch(mailbox))
            .await
    }
}

#[cfg(test)]
mod tests;
