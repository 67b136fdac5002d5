//! Relay behaviour and the HTTP contract of the stream gateway.

use std::future::poll_fn;
use std::pin::Pin;

use actix_web::body::MessageBody;
use actix_web::http::StatusCode;
use actix_web::{App, test};
use chrono::TimeZone;
use futures_util::stream::BoxStream;
use rstest::{fixture, rstest};
use tokio::sync::Semaphore;

use super::*;
use crate::domain::ports::EventBroker;
use crate::domain::{HistoryCursor, RateLimitConfig, UserId};
use crate::inbound::http::state::StreamSettings;
use crate::inbound::http::test_utils::{login_route, session_cookie_for, test_session_middleware};
use crate::test_support::pipeline::TestPipeline;
use crate::test_support::provider::FakeMailProvider;
use crate::test_support::resilience::MutableClock;

#[fixture]
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0)
        .single()
        .expect("valid timestamp")
}

fn user(raw: &str) -> UserId {
    UserId::new(raw).expect("valid user id")
}

fn event_payload(recipient: &str, now: DateTime<Utc>) -> String {
    let event = ChangeEvent::new(
        user(recipient),
        ChangeKind::Created,
        json!({ "messageId": "m-1" }),
        now,
    );
    serde_json::to_string(&event).expect("encode event")
}

fn relay(subscription: BoxStream<'static, String>, now: DateTime<Utc>) -> Relay {
    Relay {
        user_id: user("user-1"),
        subscription,
        clock: Arc::new(MutableClock::new(now)),
        heartbeat: Duration::from_secs(30),
    }
}

fn event_type(frame: &str) -> &str {
    frame
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("event: "))
        .expect("event line")
}

fn frame_json(frame: &str) -> Value {
    let data = frame
        .lines()
        .nth(1)
        .and_then(|line| line.strip_prefix("data: "))
        .expect("data line");
    serde_json::from_str(data).expect("frame json")
}

#[rstest]
#[std::prelude::v1::test]
fn frames_follow_event_stream_format(now: DateTime<Utc>) {
    let frame = encode_frame(ChangeKind::Deleted, &json!({ "messageId": "m-9" }), now);

    assert!(frame.starts_with("event: item_delete\ndata: "));
    assert!(frame.ends_with("\n\n"));
    let body = frame_json(&frame);
    assert_eq!(body["type"], "item_delete");
    assert_eq!(body["data"]["messageId"], "m-9");
    assert_eq!(body["timestamp"], "2026-10-16T09:30:00Z");
}

#[rstest]
#[tokio::test]
async fn relays_only_own_decodable_events(now: DateTime<Utc>) {
    let payloads = vec![
        "not json".to_owned(),
        event_payload("someone-else", now),
        event_payload("user-1", now),
    ];
    let subscription = stream::iter(payloads).chain(stream::pending()).boxed();
    let (tx, mut rx) = mpsc::channel(8);
    let task = tokio::spawn(relay(subscription, now).run(tx, None));

    let connected = rx.recv().await.expect("connected frame");
    assert_eq!(event_type(&connected), "connected");
    assert_eq!(frame_json(&connected)["data"]["userId"], "user-1");

    let relayed = rx.recv().await.expect("relayed frame");
    assert_eq!(event_type(&relayed), "new_item");
    assert_eq!(frame_json(&relayed)["data"]["messageId"], "m-1");

    drop(rx);
    assert_eq!(task.await.expect("relay task"), CloseReason::ClientGone);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn idle_streams_receive_heartbeats(now: DateTime<Utc>) {
    let (tx, mut rx) = mpsc::channel(8);
    let _task = tokio::spawn(relay(stream::pending::<String>().boxed(), now).run(tx, None));

    let _connected = rx.recv().await.expect("connected frame");
    let started = Instant::now();
    let heartbeat = rx.recv().await.expect("heartbeat frame");

    assert_eq!(event_type(&heartbeat), "heartbeat");
    assert!(started.elapsed() >= Duration::from_secs(30));
}

#[rstest]
#[tokio::test]
async fn closed_subscription_ends_stream_with_error(now: DateTime<Utc>) {
    let (tx, mut rx) = mpsc::channel(8);
    let reason = relay(stream::empty::<String>().boxed(), now).run(tx, None).await;

    assert_eq!(reason, CloseReason::SubscriptionClosed);
    let _connected = rx.recv().await.expect("connected frame");
    let closed = rx.recv().await.expect("error frame");
    assert_eq!(event_type(&closed), "error");
    assert_eq!(frame_json(&closed)["data"]["code"], "subscription_closed");
    assert!(rx.recv().await.is_none());
}

#[rstest]
#[tokio::test]
async fn permit_is_released_when_client_leaves(now: DateTime<Utc>) {
    let slots = Arc::new(Semaphore::new(1));
    let permit = slots.clone().try_acquire_owned().expect("permit");
    let (tx, rx) = mpsc::channel(8);
    drop(rx);

    let reason = relay(stream::pending::<String>().boxed(), now)
        .run(tx, Some(permit))
        .await;

    assert_eq!(reason, CloseReason::ClientGone);
    assert_eq!(slots.available_permits(), 1);
}

fn pipeline() -> TestPipeline {
    TestPipeline::new(FakeMailProvider::new(HistoryCursor::new(1), Utc::now()))
}

fn stream_state(pipeline: &TestPipeline, max_connections: usize) -> HttpState {
    pipeline.http_state(
        RateLimitConfig::default(),
        StreamSettings {
            max_connections,
            heartbeat: Duration::from_secs(30),
        },
    )
}

async fn next_chunk<B: MessageBody + Unpin>(body: &mut B) -> String {
    let chunk = poll_fn(|cx| Pin::new(&mut *body).poll_next(cx))
        .await
        .expect("stream chunk")
        .unwrap_or_else(|_| panic!("body error"));
    String::from_utf8(chunk.to_vec()).expect("utf8 frame")
}

#[actix_web::test]
async fn anonymous_clients_are_unauthorised() {
    let pipeline = pipeline();
    let app = test::init_service(
        App::new()
            .wrap(test_session_middleware())
            .app_data(web::Data::new(stream_state(&pipeline, 10)))
            .service(stream_updates),
    )
    .await;

    let res = test::call_service(
        &app,
        test::TestRequest::get().uri("/stream/updates").to_request(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn connection_cap_rejects_with_retry_after() {
    let pipeline = pipeline();
    let app = test::init_service(
        App::new()
            .wrap(test_session_middleware())
            .app_data(web::Data::new(stream_state(&pipeline, 0)))
            .service(stream_updates)
            .configure(login_route),
    )
    .await;
    let cookie = session_cookie_for(&app, "user-1").await;

    let res = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/stream/updates")
            .cookie(cookie)
            .to_request(),
    )
    .await;

    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        res.headers()
            .get(header::RETRY_AFTER)
            .map(|value| value.as_bytes()),
        Some(&b"5"[..])
    );
}

#[actix_web::test]
async fn streams_connected_then_published_events() {
    let pipeline = pipeline();
    let state = stream_state(&pipeline, 10);
    let app = test::init_service(
        App::new()
            .wrap(test_session_middleware())
            .app_data(web::Data::new(state.clone()))
            .service(stream_updates)
            .configure(login_route),
    )
    .await;
    let cookie = session_cookie_for(&app, "user-1").await;

    let res = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/stream/updates")
            .cookie(cookie)
            .to_request(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let header_value = |name: header::HeaderName| {
        res.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };
    assert_eq!(
        header_value(header::CONTENT_TYPE).as_deref(),
        Some("text/event-stream")
    );
    assert_eq!(
        header_value(header::CACHE_CONTROL).as_deref(),
        Some("no-cache, no-store, no-transform")
    );
    assert_eq!(
        header_value(header::HeaderName::from_static("x-accel-buffering")).as_deref(),
        Some("no")
    );
    assert_eq!(state.stream_slots.available_permits(), 9);

    let mut body = res.into_body();
    let connected = next_chunk(&mut body).await;
    assert_eq!(event_type(&connected), "connected");

    pipeline
        .broker
        .publish(
            &UserTopic::for_user(&user("user-1")),
            event_payload("user-1", Utc::now()),
        )
        .await
        .expect("publish");
    let relayed = next_chunk(&mut body).await;
    assert_eq!(event_type(&relayed), "new_item");
}
