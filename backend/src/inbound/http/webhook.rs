//! Push transport webhook.
//!
//! ```text
//! POST /webhooks/mail-provider
//! {"message":{"data":"<base64 json>","messageId":"...","publishTime":"..."},"subscription":"..."}
//! ```
//!
//! Steps run in a fixed order: rate limit, authenticate, decode, then hand
//! the notification to [`crate::domain::PushNotificationService`]. Nothing is
//! decoded before the caller is authenticated.

use std::net::SocketAddr;
use std::time::Duration;

use actix_web::http::header::{self, HeaderMap};
use actix_web::{HttpRequest, HttpResponse, post, web};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::domain::{
    Error, HistoryCursor, MailboxAddress, PushCredentials, PushNotification, RateDecision,
};
use crate::inbound::http::ApiResult;
use crate::inbound::http::state::HttpState;

/// Header carrying the rate limit bypass secret.
pub const RATE_LIMIT_BYPASS_HEADER: &str = "x-ratelimit-bypass";
/// Header carrying the legacy shared verification token.
pub const CHANNEL_TOKEN_HEADER: &str = "x-goog-channel-token";

/// Push transport envelope.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushEnvelope {
    pub message: PushMessage,
    /// Subscription that delivered the message.
    #[serde(default)]
    pub subscription: Option<String>,
}

/// Message inside a [`PushEnvelope`].
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64-encoded JSON `{"emailAddress", "historyId"}`.
    pub data: String,
    /// Transport delivery id, used for deduplication.
    #[serde(alias = "message_id")]
    pub message_id: String,
    #[serde(default, alias = "publish_time")]
    pub publish_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationData {
    #[serde(alias = "mailbox_address")]
    email_address: String,
    #[serde(alias = "cursor_hint")]
    history_id: HistoryCursor,
}

/// Body of every 200 response.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    /// `processed`, `noop`, `duplicate`, `skipped`, `unknown_mailbox` or `resync_required`.
    #[schema(example = "processed")]
    pub status: String,
}

/// Receive one push delivery.
#[utoipa::path(
    post,
    path = "/webhooks/mail-provider",
    tags = ["webhooks"],
    security([]),
    request_body = PushEnvelope,
    params(
        ("Authorization" = Option<String>, Header, description = "Bearer OIDC identity token"),
        ("X-Goog-Channel-Token" = Option<String>, Header, description = "Legacy shared verification token"),
        ("X-RateLimit-Bypass" = Option<String>, Header, description = "Rate limit bypass secret"),
        ("token" = Option<String>, Query, description = "Legacy shared verification token"),
    ),
    responses(
        (status = 200, description = "Delivery handled", body = WebhookAck),
        (status = 400, description = "Malformed envelope or notification", body = crate::inbound::http::schemas::ErrorSchema),
        (status = 401, description = "Delivery not authenticated", body = crate::inbound::http::schemas::ErrorSchema),
        (status = 429, description = "Rate limited; see Retry-After", body = crate::inbound::http::schemas::ErrorSchema),
        (status = 500, description = "Transient failure; the transport should redeliver", body = crate::inbound::http::schemas::ErrorSchema)
    )
)]
#[post("/webhooks/mail-provider")]
pub async fn receive_push(
    state: web::Data<HttpState>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    enforce_rate_limit(&state, &req)?;

    let query_token = query_token(req.query_string());
    let credentials = credentials(req.headers(), query_token.as_deref());
    if let Err(auth_error) = state.authenticator.authenticate(credentials).await {
        if auth_error.is_internal() {
            error!(error = %auth_error, "push authentication unavailable");
            return Err(Error::internal("push authentication unavailable"));
        }
        warn!(error = %auth_error, "push delivery rejected");
        return Err(Error::unauthorized("push delivery not authenticated"));
    }

    let notification = decode_notification(&body)?;
    debug!(
        message_id = %notification.message_id,
        mailbox = %notification.mailbox.fingerprint(),
        hint = %notification.cursor_hint,
        "push delivery accepted"
    );

    let outcome = state.push.handle(&notification).await.map_err(|failure| {
        error!(message_id = %notification.message_id, error = %failure, "push delivery failed");
        Error::internal("push delivery could not be processed")
    })?;
    info!(
        message_id = %notification.message_id,
        status = outcome.as_str(),
        "push delivery handled"
    );

    Ok(HttpResponse::Ok().json(WebhookAck {
        status: outcome.as_str().to_owned(),
    }))
}

fn enforce_rate_limit(state: &HttpState, req: &HttpRequest) -> ApiResult<()> {
    let bypass = header_str(req.headers(), RATE_LIMIT_BYPASS_HEADER);
    if state.limiter.is_bypass(bypass) {
        return Ok(());
    }
    let key = client_key(req, state.trust_forwarded_for);
    match state.limiter.check(&key) {
        RateDecision::Allowed => Ok(()),
        decision @ RateDecision::Limited { .. } => {
            let secs = decision.retry_after_secs().unwrap_or(1);
            warn!(client = %key, retry_after = secs, "webhook rate limited");
            Err(Error::rate_limited(
                "too many push deliveries",
                Duration::from_secs(secs),
            ))
        }
    }
}

/// Limiter key: the TCP peer, or the forwarded client when a trusted proxy
/// sits in front. Ports are dropped so reconnects share a window.
fn client_key(req: &HttpRequest, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let info = req.connection_info();
        if let Some(raw) = info.realip_remote_addr() {
            return raw
                .parse::<SocketAddr>()
                .map(|addr| addr.ip().to_string())
                .unwrap_or_else(|_| raw.to_owned());
        }
    }
    req.peer_addr()
        .map_or_else(|| "unknown".to_owned(), |addr| addr.ip().to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn query_token(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

fn credentials<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> PushCredentials<'a> {
    let bearer = header_str(headers, header::AUTHORIZATION.as_str()).and_then(|value| {
        value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .map(str::trim)
    });
    PushCredentials {
        bearer,
        shared_token: header_str(headers, CHANNEL_TOKEN_HEADER).or(query_token),
    }
}

fn decode_base64(raw: &str) -> Option<Vec<u8>> {
    let raw = raw.trim();
    STANDARD
        .decode(raw)
        .or_else(|_| URL_SAFE.decode(raw))
        .or_else(|_| URL_SAFE_NO_PAD.decode(raw))
        .ok()
}

fn decode_notification(body: &[u8]) -> ApiResult<PushNotification> {
    let envelope: PushEnvelope = serde_json::from_slice(body)
        .map_err(|err| Error::invalid_request(format!("malformed push envelope: {err}")))?;
    let message_id = envelope.message.message_id.trim();
    if message_id.is_empty() {
        return Err(Error::invalid_request("push envelope is missing messageId"));
    }

    let data = decode_base64(&envelope.message.data)
        .ok_or_else(|| Error::invalid_request("push message data is not base64"))?;
    let data: NotificationData = serde_json::from_slice(&data)
        .map_err(|err| Error::invalid_request(format!("malformed push notification: {err}")))?;
    let mailbox = MailboxAddress::new(data.email_address)
        .map_err(|err| Error::invalid_request(err.to_string()))?;

    Ok(PushNotification {
        message_id: message_id.to_owned(),
        mailbox,
        cursor_hint: data.history_id,
    })
}

#[cfg(test)]
mod tests {
    //! Envelope decoding and credential extraction.
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};
    use actix_web::test::TestRequest;
    use rstest::rstest;
    use serde_json::json;

    fn envelope(data: &str) -> Vec<u8> {
        json!({
            "message": {"data": data, "messageId": "delivery-1", "publishTime": "2026-10-16T09:00:00Z"},
            "subscription": "projects/demo/subscriptions/mail"
        })
        .to_string()
        .into_bytes()
    }

    #[rstest]
    #[case(STANDARD.encode(r#"{"emailAddress":"someone@example.com","historyId":"105"}"#))]
    #[case(URL_SAFE_NO_PAD.encode(r#"{"emailAddress":"someone@example.com","historyId":105}"#))]
    #[case(STANDARD.encode(r#"{"mailbox_address":"someone@example.com","cursor_hint":105}"#))]
    fn decodes_notification_forms(#[case] data: String) {
        let notification = decode_notification(&envelope(&data)).expect("decodes");
        assert_eq!(notification.message_id, "delivery-1");
        assert_eq!(notification.mailbox.as_str(), "someone@example.com");
        assert_eq!(notification.cursor_hint, HistoryCursor::new(105));
    }

    #[rstest]
    #[case::not_json(b"not json".to_vec())]
    #[case::not_base64(envelope("***"))]
    #[case::bad_payload(envelope(&STANDARD.encode("[1,2,3]")))]
    #[case::bad_mailbox(envelope(&STANDARD.encode(r#"{"emailAddress":"nobody","historyId":1}"#)))]
    #[case::missing_history(envelope(&STANDARD.encode(r#"{"emailAddress":"a@b.c"}"#)))]
    fn malformed_deliveries_are_invalid_requests(#[case] body: Vec<u8>) {
        let error = decode_notification(&body).expect_err("rejected");
        assert_eq!(error.code(), crate::domain::ErrorCode::InvalidRequest);
    }

    #[test]
    fn accepts_snake_case_message_id() {
        let body = json!({
            "message": {
                "data": STANDARD.encode(r#"{"emailAddress":"a@b.c","historyId":7}"#),
                "message_id": "delivery-2"
            }
        })
        .to_string();
        let notification = decode_notification(body.as_bytes()).expect("decodes");
        assert_eq!(notification.message_id, "delivery-2");
    }

    #[test]
    fn bearer_is_extracted_alongside_channel_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer id-token"),
        );
        headers.insert(
            HeaderName::from_static(CHANNEL_TOKEN_HEADER),
            HeaderValue::from_static("shared"),
        );

        let creds = credentials(&headers, None);
        assert_eq!(creds.bearer, Some("id-token"));
        assert_eq!(creds.shared_token, Some("shared"));
    }

    #[rstest]
    #[case("token=abc", Some("abc"))]
    #[case("a=1&token=x%20y", Some("x y"))]
    #[case("token=", None)]
    #[case("", None)]
    fn reads_token_query_parameter(#[case] query: &str, #[case] expected: Option<&str>) {
        assert_eq!(query_token(query).as_deref(), expected);
    }

    fn forwarded_request(forwarded_for: &str) -> HttpRequest {
        let peer: SocketAddr = "10.1.2.3:40000".parse().expect("socket addr");
        TestRequest::post()
            .peer_addr(peer)
            .insert_header(("x-forwarded-for", forwarded_for))
            .to_http_request()
    }

    #[rstest]
    #[case("198.51.100.7")]
    #[case("203.0.113.9, 10.0.0.1")]
    fn untrusted_forwarding_headers_are_ignored(#[case] forwarded_for: &str) {
        assert_eq!(client_key(&forwarded_request(forwarded_for), false), "10.1.2.3");
    }

    #[test]
    fn trusted_proxy_keys_on_forwarded_client() {
        assert_eq!(
            client_key(&forwarded_request("198.51.100.7"), true),
            "198.51.100.7"
        );
    }

    #[test]
    fn missing_peer_shares_one_bucket() {
        let req = TestRequest::post().to_http_request();
        assert_eq!(client_key(&req, false), "unknown");
    }
}
