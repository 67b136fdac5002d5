//! Rolling-window circuit breaker for upstream calls.
//!
//! Closed calls are sampled over `window`; once at least `min_volume` samples
//! exist and the failure share reaches the threshold the breaker opens. After
//! `cooldown` a single probe is admitted: success closes, failure re-opens.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failure share, in percent, at which the breaker opens.
    pub error_rate_threshold_percent: u8,
    /// Minimum samples in the window before the rate is evaluated.
    pub min_volume: u32,
    /// Sampling window length.
    pub window: Duration,
    /// How long the breaker stays open before admitting a probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold_percent: 50,
            min_volume: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// One probe call is in flight.
    HalfOpen,
}

/// Admission decision for one call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call may proceed.
    Allowed,
    /// The breaker rejected the call.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InternalState {
    Closed,
    Open { opened_at: DateTime<Utc> },
    HalfOpen { probe_started_at: DateTime<Utc> },
}

/// Transition observed while recording an outcome, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No state change.
    None,
    /// The breaker opened (from closed or half-open).
    Opened,
    /// The probe succeeded and the breaker closed.
    Closed,
}

/// Mutable breaker state owned by one resilient client.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: InternalState,
    samples: VecDeque<(DateTime<Utc>, bool)>,
}

impl CircuitBreaker {
    /// Build a closed breaker.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config: BreakerConfig {
                error_rate_threshold_percent: config.error_rate_threshold_percent.clamp(1, 100),
                min_volume: config.min_volume.max(1),
                ..config
            },
            state: InternalState::Closed,
            samples: VecDeque::new(),
        }
    }

    /// Decide whether a call may proceed at `now`.
    pub fn admit(&mut self, now: DateTime<Utc>) -> Admission {
        match self.state {
            InternalState::Closed => Admission::Allowed,
            InternalState::Open { opened_at } if elapsed(opened_at, now, self.config.cooldown) => {
                self.state = InternalState::HalfOpen {
                    probe_started_at: now,
                };
                Admission::Allowed
            }
            InternalState::Open { .. } => Admission::Rejected,
            // A probe abandoned by a cancelled caller must not wedge the breaker.
            InternalState::HalfOpen { probe_started_at }
                if elapsed(probe_started_at, now, self.config.cooldown) =>
            {
                self.state = InternalState::HalfOpen {
                    probe_started_at: now,
                };
                Admission::Allowed
            }
            InternalState::HalfOpen { .. } => Admission::Rejected,
        }
    }

    /// Record a call that reached a healthy dependency.
    pub fn record_success(&mut self, now: DateTime<Utc>) -> Transition {
        match self.state {
            InternalState::HalfOpen { .. } => {
                self.state = InternalState::Closed;
                self.samples.clear();
                Transition::Closed
            }
            InternalState::Closed => {
                self.push_sample(now, false);
                Transition::None
            }
            InternalState::Open { .. } => Transition::None,
        }
    }

    /// Record a call that indicates an unhealthy dependency.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Transition {
        match self.state {
            InternalState::HalfOpen { .. } => {
                self.trip(now);
                Transition::Opened
            }
            InternalState::Closed => {
                self.push_sample(now, true);
                if self.threshold_crossed() {
                    self.trip(now);
                    Transition::Opened
                } else {
                    Transition::None
                }
            }
            InternalState::Open { .. } => Transition::None,
        }
    }

    /// Current externally visible state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        match self.state {
            InternalState::Closed => BreakerState::Closed,
            InternalState::Open { .. } => BreakerState::Open,
            InternalState::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    fn trip(&mut self, now: DateTime<Utc>) {
        self.state = InternalState::Open { opened_at: now };
        self.samples.clear();
    }

    fn push_sample(&mut self, now: DateTime<Utc>, failed: bool) {
        self.samples.push_back((now, failed));
        let window = chrono::Duration::from_std(self.config.window).unwrap_or(chrono::Duration::MAX);
        while let Some((at, _)) = self.samples.front() {
            if now.signed_duration_since(*at) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn threshold_crossed(&self) -> bool {
        let total = self.samples.len();
        if u32::try_from(total).unwrap_or(u32::MAX) < self.config.min_volume {
            return false;
        }
        let failures = self.samples.iter().filter(|(_, failed)| *failed).count();
        failures.saturating_mul(100)
            >= total.saturating_mul(usize::from(self.config.error_rate_threshold_percent))
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>, period: Duration) -> bool {
    // Treat unconvertible periods as elapsed rather than holding the breaker forever.
    let Ok(period) = chrono::Duration::from_std(period) else {
        return true;
    };
    since
        .checked_add_signed(period)
        .is_none_or(|ends| now >= ends)
}
