//! Shared HTTP adapter state.
//!
//! HTTP handlers accept this state via `actix_web::web::Data` so they only
//! depend on domain services and ports and remain testable without I/O.

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use tokio::sync::Semaphore;

use crate::domain::ports::EventBroker;
use crate::domain::{
    PushAuthenticator, PushNotificationService, SlidingWindowLimiter, UpstreamHealthReporter,
};

/// Parameter object bundling the services and ports HTTP handlers use.
#[derive(Clone)]
pub struct HttpStatePorts {
    pub push: Arc<PushNotificationService>,
    pub authenticator: Arc<PushAuthenticator>,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub broker: Arc<dyn EventBroker>,
    pub upstream: Arc<dyn UpstreamHealthReporter>,
    pub clock: Arc<dyn Clock>,
}

/// Stream gateway tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Process-wide cap on concurrent stream connections.
    pub max_connections: usize,
    /// Interval between heartbeat frames.
    pub heartbeat: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            heartbeat: Duration::from_secs(30),
        }
    }
}

/// Dependency bundle for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub push: Arc<PushNotificationService>,
    pub authenticator: Arc<PushAuthenticator>,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub broker: Arc<dyn EventBroker>,
    pub upstream: Arc<dyn UpstreamHealthReporter>,
    pub clock: Arc<dyn Clock>,
    /// One permit per open stream connection.
    pub stream_slots: Arc<Semaphore>,
    pub heartbeat: Duration,
    /// Key rate limits on `Forwarded`/`X-Forwarded-For` instead of the peer.
    pub trust_forwarded_for: bool,
}

impl HttpState {
    /// Construct state from a ports bundle and stream settings.
    pub fn new(ports: HttpStatePorts, stream: StreamSettings) -> Self {
        let HttpStatePorts {
            push,
            authenticator,
            limiter,
            broker,
            upstream,
            clock,
        } = ports;
        Self {
            push,
            authenticator,
            limiter,
            broker,
            upstream,
            clock,
            stream_slots: Arc::new(Semaphore::new(stream.max_connections)),
            heartbeat: stream.heartbeat,
            trust_forwarded_for: false,
        }
    }

    /// Replace the upstream health reporter.
    #[must_use]
    pub fn with_upstream(mut self, upstream: Arc<dyn UpstreamHealthReporter>) -> Self {
        self.upstream = upstream;
        self
    }

    /// Trust forwarding headers set by a reverse proxy in front of the server.
    #[must_use]
    pub fn with_trusted_proxy(mut self, trusted: bool) -> Self {
        self.trust_forwarded_for = trusted;
        self
    }
}
