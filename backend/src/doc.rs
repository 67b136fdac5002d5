//! OpenAPI documentation configuration.
//!
//! This module defines the [`ApiDoc`] struct which generates the OpenAPI
//! specification for the HTTP surface. It registers:
//!
//! - **Paths**: the push webhook, the event stream and the health probes
//! - **Schemas**: domain type wrappers ([`ErrorSchema`], [`ErrorCodeSchema`],
//!   [`UpstreamHealthSchema`]) that provide OpenAPI definitions without
//!   coupling domain types to the utoipa framework
//! - **Security**: Session cookie authentication scheme for the stream
//!
//! The generated specification is used by Swagger UI (debug builds) and
//! exported via `cargo run --bin openapi-dump` for external tooling.

use crate::inbound::http::schemas::{
    BreakerStateSchema, ErrorCodeSchema, ErrorSchema, StreamFrameSchema, UpstreamHealthSchema,
};
use crate::inbound::http::webhook::{PushEnvelope, PushMessage, WebhookAck};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Enrich the generated document with the session cookie security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi
            .components
            .get_or_insert_with(utoipa::openapi::Components::default);

        components.add_security_scheme(
            "SessionCookie",
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                "session",
                "Session cookie issued by the application's login flow.",
            ))),
        );
    }
}

/// OpenAPI document for the HTTP surface.
/// Swagger UI is enabled in debug builds only and used by tooling.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "mailpush API",
        description = "Push webhook ingestion, per-user change streams and health probes."
    ),
    servers(
        (url = "/", description = "Relative to the deployment base URL")
    ),
    paths(
        crate::inbound::http::webhook::receive_push,
        crate::inbound::http::stream::stream_updates,
        crate::inbound::http::health::ready,
        crate::inbound::http::health::live,
        crate::inbound::http::health::upstream,
    ),
    components(schemas(
        ErrorSchema,
        ErrorCodeSchema,
        UpstreamHealthSchema,
        BreakerStateSchema,
        StreamFrameSchema,
        PushEnvelope,
        PushMessage,
        WebhookAck
    )),
    tags(
        (name = "webhooks", description = "Push transport deliveries"),
        (name = "stream", description = "Server-Sent Events for signed-in users"),
        (name = "health", description = "Endpoints for health checks")
    )
)]
pub struct ApiDoc;
