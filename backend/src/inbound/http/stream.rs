//! Server-Sent Events gateway relaying a user's change events.
//!
//! Each connection holds one permit from the process-wide connection cap and
//! one broker subscription. Both live inside the relay task, so every exit
//! path (client gone, broker closed) releases them by drop.

use std::sync::Arc;
use std::time::Duration;

use actix_web::http::header;
use actix_web::{HttpResponse, get, web};
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use mockable::Clock;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{OwnedSemaphorePermit, mpsc};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{info, warn};

use crate::domain::ports::BrokerSubscription;
use crate::domain::{ChangeEvent, ChangeKind, Error, UserId, UserTopic};
use crate::inbound::http::ApiResult;
use crate::inbound::http::session::SessionContext;
use crate::inbound::http::state::HttpState;

const CAPACITY_RETRY_AFTER: Duration = Duration::from_secs(5);
const FRAME_BUFFER: usize = 32;
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

/// JSON carried on a frame's `data:` line.
#[derive(Debug, Serialize)]
pub struct StreamFrame<'a> {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub data: &'a Value,
    pub timestamp: DateTime<Utc>,
}

/// Encode one SSE frame: `event: <type>\ndata: <json>\n\n`.
pub fn encode_frame(kind: ChangeKind, data: &Value, timestamp: DateTime<Utc>) -> String {
    let frame = StreamFrame {
        kind,
        data,
        timestamp,
    };
    let payload = serde_json::to_string(&frame).unwrap_or_else(|error| {
        warn!(%error, kind = kind.as_str(), "stream frame encoding failed");
        String::from("{}")
    });
    format!("event: {}\ndata: {payload}\n\n", kind.as_str())
}

fn encode_event(event: &ChangeEvent) -> String {
    encode_frame(event.kind, &event.data, event.timestamp)
}

/// Why a relay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away.
    ClientGone,
    /// The broker ended the subscription.
    SubscriptionClosed,
}

/// Relay loop driving one connection.
pub struct Relay {
    pub user_id: UserId,
    pub subscription: BrokerSubscription,
    pub clock: Arc<dyn Clock>,
    pub heartbeat: Duration,
}

impl Relay {
    /// Push frames into `tx` until the client leaves or the broker closes.
    ///
    /// `permit` is held for the lifetime of the relay.
    pub async fn run(
        self,
        tx: mpsc::Sender<String>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> CloseReason {
        let _permit = permit;
        let Self {
            user_id,
            mut subscription,
            clock,
            heartbeat,
        } = self;

        let connected = json!({ "userId": user_id });
        if tx
            .send(encode_frame(ChangeKind::Connected, &connected, clock.utc()))
            .await
            .is_err()
        {
            return CloseReason::ClientGone;
        }

        let heartbeat = heartbeat.max(MIN_HEARTBEAT);
        let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let frame = tokio::select! {
                () = tx.closed() => return CloseReason::ClientGone,
                _ = ticker.tick() => {
                    encode_frame(ChangeKind::Heartbeat, &json!({}), clock.utc())
                }
                next = subscription.next() => match next {
                    Some(payload) => match serde_json::from_str::<ChangeEvent>(&payload) {
                        Ok(event) if event.user_id == user_id => encode_event(&event),
                        Ok(event) => {
                            warn!(%user_id, recipient = %event.user_id, "dropping event for another user");
                            continue;
                        }
                        Err(error) => {
                            warn!(%user_id, %error, "skipping undecodable broker payload");
                            continue;
                        }
                    },
                    None => {
                        let closed = json!({ "code": "subscription_closed" });
                        // Best effort; the stream ends either way.
                        let _ = tx.send(encode_frame(ChangeKind::Error, &closed, clock.utc())).await;
                        return CloseReason::SubscriptionClosed;
                    }
                },
            };
            if tx.send(frame).await.is_err() {
                return CloseReason::ClientGone;
            }
        }
    }
}

/// Stream change events for the session user.
#[utoipa::path(
    get,
    path = "/stream/updates",
    tags = ["stream"],
    security(("SessionCookie" = [])),
    responses(
        (status = 200, description = "Event stream; `data:` lines carry StreamFrame JSON",
            content_type = "text/event-stream",
            body = crate::inbound::http::schemas::StreamFrameSchema),
        (status = 401, description = "No session user", body = crate::inbound::http::schemas::ErrorSchema),
        (status = 503, description = "Connection cap reached or broker unavailable",
            body = crate::inbound::http::schemas::ErrorSchema,
            headers(("Retry-After" = u64, description = "Seconds to wait before reconnecting")))
    )
)]
#[get("/stream/updates")]
pub async fn stream_updates(
    state: web::Data<HttpState>,
    session: SessionContext,
) -> ApiResult<HttpResponse> {
    let user_id = session.require_user_id()?;

    let permit = state.stream_slots.clone().try_acquire_owned().map_err(|_| {
        warn!(%user_id, "stream connection cap reached");
        Error::service_unavailable("too many open streams").with_retry_after(CAPACITY_RETRY_AFTER)
    })?;

    let topic = UserTopic::for_user(&user_id);
    let subscription = state.broker.subscribe(&topic).await.map_err(|error| {
        warn!(%user_id, %error, "stream subscription failed");
        Error::service_unavailable("event stream unavailable")
    })?;
    info!(%user_id, "stream opened");

    let (tx, rx) = mpsc::channel::<String>(FRAME_BUFFER);
    let relay = Relay {
        user_id: user_id.clone(),
        subscription,
        clock: state.clock.clone(),
        heartbeat: state.heartbeat,
    };
    actix_web::rt::spawn(async move {
        let reason = relay.run(tx, Some(permit)).await;
        info!(%user_id, ?reason, "stream closed");
    });

    let body = stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        Some((Ok::<_, actix_web::Error>(web::Bytes::from(frame)), rx))
    });

    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache, no-store, no-transform"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body))
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
