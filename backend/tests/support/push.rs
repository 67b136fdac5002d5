//! Helpers for driving the webhook through an in-process pipeline.

use actix_http::Request;
use actix_web::body::BoxBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::test::{self, TestRequest};
use actix_web::{App, web};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mailpush::domain::RateLimitConfig;
use mailpush::inbound::http::state::StreamSettings;
use mailpush::inbound::http::webhook::{CHANNEL_TOKEN_HEADER, receive_push};
use mailpush::test_support::pipeline::{SHARED_TOKEN, TestPipeline};
use serde_json::{Value, json};

pub const MAILBOX: &str = "ada@example.com";

/// Envelope for `delivery_id` announcing `history_id` on `mailbox`.
pub fn envelope(delivery_id: &str, mailbox: &str, history_id: u64) -> Value {
    let data = json!({ "emailAddress": mailbox, "historyId": history_id.to_string() });
    json!({
        "message": {
            "data": STANDARD.encode(data.to_string()),
            "messageId": delivery_id,
            "publishTime": "2026-10-16T09:00:00Z"
        },
        "subscription": "projects/test/subscriptions/mail"
    })
}

/// Authenticated webhook request carrying `body`.
pub fn push_request(body: &Value) -> TestRequest {
    TestRequest::post()
        .uri("/webhooks/mail-provider")
        .insert_header((CHANNEL_TOKEN_HEADER, SHARED_TOKEN))
        .set_json(body)
}

pub async fn webhook_app(
    pipeline: &TestPipeline,
    rate_limit: RateLimitConfig,
) -> impl Service<Request, Response = ServiceResponse<BoxBody>, Error = actix_web::Error> {
    test::init_service(
        App::new()
            .app_data(web::Data::new(
                pipeline.http_state(rate_limit, StreamSettings::default()),
            ))
            .service(receive_push),
    )
    .await
}

/// `status` field of a 200 acknowledgement.
pub async fn ack_status(res: ServiceResponse<BoxBody>) -> String {
    let body: Value = test::read_body_json(res).await;
    body["status"].as_str().unwrap_or_default().to_owned()
}
