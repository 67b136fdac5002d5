//! Email change-notification backend.
//!
//! Push deliveries from the mail provider enter through the webhook, are
//! reconciled against the provider's history under a per-account lock and
//! fan out to signed-in clients as Server-Sent Events.

pub mod bootstrap;
pub mod doc;
pub mod domain;
pub mod inbound;
pub mod middleware;
pub mod outbound;
pub mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

/// Public OpenAPI surface used by Swagger UI and tooling.
pub use doc::ApiDoc;
pub use domain::TraceId;
pub use middleware::Trace;
