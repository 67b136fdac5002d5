//! Sliding-window admission keyed by client address.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mockable::Clock;
use zeroize::Zeroizing;

use super::push_auth::constant_time_eq;

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The request may proceed.
    Allowed,
    /// The key exhausted its window; retry after the given delay.
    Limited {
        /// Time until the oldest request leaves the window.
        retry_after: Duration,
    },
}

impl RateDecision {
    /// Whole seconds for a `Retry-After` header, rounded up and at least one.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Allowed => None,
            Self::Limited { retry_after } => {
                let secs = retry_after
                    .as_secs()
                    .saturating_add(u64::from(retry_after.subsec_nanos() > 0));
                Some(secs.max(1))
            }
        }
    }
}

/// Limiter tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests admitted per key within `window`.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 120,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Default)]
struct Windows {
    by_key: HashMap<String, VecDeque<DateTime<Utc>>>,
    last_sweep: Option<DateTime<Utc>>,
}

/// Per-key sliding-window limiter with an optional bypass secret.
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    window: chrono::Duration,
    clock: Arc<dyn Clock>,
    bypass_token: Option<Zeroizing<String>>,
    windows: Mutex<Windows>,
}

impl SlidingWindowLimiter {
    /// Build a limiter.
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>, bypass_token: Option<String>) -> Self {
        Self {
            window: chrono::Duration::from_std(config.window).unwrap_or(chrono::Duration::MAX),
            config: RateLimitConfig {
                max_requests: config.max_requests.max(1),
                ..config
            },
            clock,
            bypass_token: bypass_token.filter(|t| !t.is_empty()).map(Zeroizing::new),
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Whether `presented` matches the configured bypass secret.
    #[must_use]
    pub fn is_bypass(&self, presented: Option<&str>) -> bool {
        match (presented, self.bypass_token.as_ref()) {
            (Some(presented), Some(expected)) => constant_time_eq(presented, expected),
            _ => false,
        }
    }

    /// Record a request for `key` and decide whether it is admitted.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = self.clock.utc();
        let cutoff = now
            .checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        self.sweep_idle(&mut windows, now, cutoff);

        let entries = windows.by_key.entry(key.to_owned()).or_default();
        while entries.front().is_some_and(|at| *at <= cutoff) {
            entries.pop_front();
        }

        let used = u32::try_from(entries.len()).unwrap_or(u32::MAX);
        if used >= self.config.max_requests {
            let oldest = entries.front().copied().unwrap_or(now);
            let retry_after = oldest
                .checked_add_signed(self.window)
                .map_or(self.config.window, |reopens| {
                    (reopens - now).to_std().unwrap_or(Duration::ZERO)
                });
            return RateDecision::Limited { retry_after };
        }
        entries.push_back(now);
        RateDecision::Allowed
    }

    /// Keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .len()
    }

    fn sweep_idle(&self, windows: &mut Windows, now: DateTime<Utc>, cutoff: DateTime<Utc>) {
        if windows
            .last_sweep
            .is_some_and(|last| now - last < self.window)
        {
            return;
        }
        windows
            .by_key
            .retain(|_, entries| entries.back().is_some_and(|at| *at > cutoff));
        windows.last_sweep = Some(now);
    }
}
