//! Domain primitives, services and ports of the change-notification pipeline.
//!
//! Purpose: keep the webhook pipeline, reconciliation and fan-out logic free
//! of transport and storage concerns. Inbound adapters call the services
//! defined here; outbound adapters implement the traits in [`ports`].
//!
//! Public surface:
//! - [`PushNotificationService`] deduplicates, locks and reconciles one push
//!   delivery.
//! - [`HistoryReconciler`] pages provider history past the stored watermark.
//! - [`ResilientMailProvider`] bounds, retries and breaks upstream calls.
//! - [`EventPublisher`] fans [`ChangeEvent`]s out to per-user topics.
//! - [`AccountWatchService`] registers, renews and rebases watches.

pub mod account_lock;
pub mod change_event;
pub mod error;
pub mod event_publisher;
pub mod history_reconciler;
pub mod mailbox;
pub mod ports;
pub mod push_auth;
pub mod push_notification_service;
pub mod rate_limit;
pub mod resilience;
pub mod trace_id;
pub mod watch_service;

pub use self::account_lock::{AccountLock, DEFAULT_LOCK_TTL, LockError, LockToken};
pub use self::change_event::{ChangeEvent, ChangeKind, SyncStatus, UserTopic};
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::event_publisher::{EventPublisher, PublishStats};
pub use self::history_reconciler::{HistoryReconciler, ReconcileError, ReconcileOutcome};
pub use self::mailbox::{
    AccountId, AccountWatch, HistoryCursor, IdentifierValidationError, MailboxAddress, MessageId,
    SyncCursor, UserId,
};
pub use self::push_auth::{
    PushAuthError, PushAuthenticator, PushCredentials, PushPrincipal, constant_time_eq,
};
pub use self::push_notification_service::{
    PushNotification, PushNotificationPorts, PushNotificationService, PushOutcome,
    PushProcessingConfig, PushProcessingError,
};
pub use self::rate_limit::{RateDecision, RateLimitConfig, SlidingWindowLimiter};
pub use self::resilience::{
    BackoffJitter, BreakerConfig, BreakerState, RandomJitter, ResilienceConfig, ResilienceRuntime,
    ResilientMailProvider, RetrySleeper, TokioSleeper, UpstreamHealth, UpstreamHealthReporter,
};
pub use self::trace_id::TraceId;
pub use self::watch_service::{
    AccountWatchService, RenewalReport, WatchServiceError, WatchServicePorts,
};

/// Response header carrying the request's trace identifier.
pub const TRACE_ID_HEADER: &str = "trace-id";

/// Convenient API result alias.
///
/// # Examples
/// ```
/// use actix_web::HttpResponse;
/// use mailpush::domain::{ApiResult, Error};
///
/// fn handler() -> ApiResult<HttpResponse> {
///     Err(Error::forbidden("nope"))
/// }
/// ```
pub type ApiResult<T> = Result<T, Error>;
