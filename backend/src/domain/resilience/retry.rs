//! Retry timing abstractions and their runtime implementations.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

/// Async clock-independent sleeping abstraction for retries.
#[async_trait]
pub trait RetrySleeper: Send + Sync {
    /// Suspend execution for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Retry backoff jitter abstraction.
pub trait BackoffJitter: Send + Sync {
    /// Return a jittered delay derived from the exponential base delay.
    ///
    /// ```rust
    /// use chrono::{TimeZone, Utc};
    /// use mailpush::domain::BackoffJitter;
    /// use std::time::Duration;
    ///
    /// struct Fixed;
    /// impl BackoffJitter for Fixed {
    ///     fn jittered_delay(&self, base: Duration, attempt: u32, _now: chrono::DateTime<Utc>) -> Duration {
    ///         base + Duration::from_millis(u64::from(attempt))
    ///     }
    /// }
    /// let now = Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).single().expect("valid time");
    /// assert_eq!(Fixed.jittered_delay(Duration::from_millis(500), 2, now), Duration::from_millis(502));
    /// ```
    fn jittered_delay(&self, base: Duration, attempt: u32, now: DateTime<Utc>) -> Duration;
}

/// Tokio-based sleeper implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl RetrySleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Adds up to 25% random extra delay so concurrent callers spread out.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl BackoffJitter for RandomJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32, _now: DateTime<Utc>) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let max_extra = base_ms / 4;
        let extra = if max_extra == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=max_extra)
        };
        Duration::from_millis(base_ms.saturating_add(extra))
    }
}

/// Exponential base delay for `attempt` (1-based), capped at `max`.
pub(super) fn exponential_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = 2_u64.saturating_pow(attempt.saturating_sub(1));
    let base_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(exponent).min(max_ms))
}
