//! OpenAPI schema definitions for domain types.
//!
//! Domain types remain framework-agnostic by not deriving `ToSchema`. This
//! module provides the schema definitions required for OpenAPI documentation
//! using utoipa's external schema registration.

use utoipa::ToSchema;

/// OpenAPI schema for [`crate::domain::ErrorCode`].
///
/// Stable machine-readable error codes returned in API error responses.
#[derive(ToSchema)]
#[schema(as = crate::domain::ErrorCode)]
pub enum ErrorCodeSchema {
    /// The request is malformed or fails validation.
    #[schema(rename = "invalid_request")]
    InvalidRequest,
    /// Authentication failed or is missing.
    #[schema(rename = "unauthorized")]
    Unauthorized,
    /// Authenticated but not permitted to perform this action.
    #[schema(rename = "forbidden")]
    Forbidden,
    /// The requested resource does not exist.
    #[schema(rename = "not_found")]
    NotFound,
    /// The request conflicts with current state.
    #[schema(rename = "conflict")]
    Conflict,
    /// Too many requests; see `Retry-After`.
    #[schema(rename = "rate_limited")]
    RateLimited,
    /// A dependency or capacity limit prevents serving the request.
    #[schema(rename = "service_unavailable")]
    ServiceUnavailable,
    /// An unexpected error occurred on the server.
    #[schema(rename = "internal_error")]
    InternalError,
}

/// OpenAPI schema for [`crate::domain::Error`].
#[derive(ToSchema)]
#[schema(as = crate::domain::Error)]
#[expect(
    dead_code,
    reason = "Used only for OpenAPI schema generation via utoipa"
)]
pub struct ErrorSchema {
    /// Stable machine-readable error code.
    #[schema(example = "unauthorized")]
    code: ErrorCodeSchema,
    /// Human-readable message returned to clients.
    #[schema(example = "push delivery carried no credentials")]
    message: String,
    /// Correlation identifier, identical to the `trace-id` response header.
    #[schema(rename = "traceId", example = "5f0c6d7e-3a4b-4c2d-9e8f-0a1b2c3d4e5f")]
    trace_id: Option<String>,
    /// Supplementary error details for clients.
    details: Option<serde_json::Value>,
}

/// OpenAPI schema for [`crate::domain::BreakerState`].
#[derive(ToSchema)]
#[schema(as = crate::domain::BreakerState)]
pub enum BreakerStateSchema {
    #[schema(rename = "closed")]
    Closed,
    #[schema(rename = "open")]
    Open,
    #[schema(rename = "half_open")]
    HalfOpen,
}

/// OpenAPI schema for [`crate::domain::UpstreamHealth`].
#[derive(ToSchema)]
#[schema(as = crate::domain::UpstreamHealth)]
#[expect(
    dead_code,
    reason = "Used only for OpenAPI schema generation via utoipa"
)]
pub struct UpstreamHealthSchema {
    #[schema(rename = "breakerState")]
    breaker_state: BreakerStateSchema,
    /// Callers waiting for a concurrency permit.
    #[schema(rename = "queueDepth")]
    queue_depth: u64,
    /// Calls currently executing upstream.
    #[schema(rename = "inFlight")]
    in_flight: u64,
    completed: u64,
    failed: u64,
    /// Calls rejected by the open breaker without contacting the provider.
    rejected: u64,
}

/// JSON carried on each stream frame's `data:` line.
#[derive(ToSchema)]
#[schema(as = crate::inbound::http::stream::StreamFrame)]
#[expect(
    dead_code,
    reason = "Used only for OpenAPI schema generation via utoipa"
)]
pub struct StreamFrameSchema {
    /// Event type, repeated from the `event:` line.
    #[schema(
        rename = "type",
        example = "new_item",
        pattern = "^(connected|new_item|item_update|item_delete|sync_complete|heartbeat|error)$"
    )]
    kind: String,
    /// Type-specific payload.
    data: serde_json::Value,
    /// RFC 3339 production time.
    #[schema(example = "2026-10-16T09:30:00Z")]
    timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use utoipa::PartialSchema;

    fn schema_to_json<T: PartialSchema>() -> String {
        serde_json::to_string(&T::schema()).expect("schema serialises to JSON")
    }

    #[test]
    fn error_code_schema_variants_match_domain() {
        let schema_json = schema_to_json::<ErrorCodeSchema>();
        for code in [
            "invalid_request",
            "unauthorized",
            "forbidden",
            "not_found",
            "conflict",
            "rate_limited",
            "service_unavailable",
            "internal_error",
        ] {
            assert!(schema_json.contains(code), "missing {code}");
        }
    }

    #[test]
    fn error_schema_uses_wire_field_names() {
        let schema_json = schema_to_json::<ErrorSchema>();
        // utoipa replaces :: with . in schema names
        assert_eq!(ErrorSchema::name(), "crate.domain.Error");
        assert!(schema_json.contains("traceId"));
        assert!(!schema_json.contains("trace_id"));
    }

    #[test]
    fn upstream_health_schema_is_camel_case() {
        let schema_json = schema_to_json::<UpstreamHealthSchema>();
        for field in ["breakerState", "queueDepth", "inFlight", "rejected"] {
            assert!(schema_json.contains(field), "missing {field}");
        }
    }
}
