//! Test helpers for inbound HTTP components.

use actix_http::Request;
use actix_session::{Session, SessionMiddleware, storage::CookieSessionStore};
use actix_web::body::MessageBody;
use actix_web::cookie::{Cookie, Key};
use actix_web::dev::{Service, ServiceResponse};
use actix_web::{HttpResponse, test, web};
use chrono::Utc;

use crate::domain::{HistoryCursor, RateLimitConfig, UpstreamHealth, UpstreamHealthReporter};
use crate::inbound::http::session::USER_ID_KEY;
use crate::inbound::http::state::{HttpState, StreamSettings};
use crate::test_support::pipeline::TestPipeline;
use crate::test_support::provider::FakeMailProvider;

/// Build a session middleware configured for tests.
///
/// - Generates a fresh signing/encryption key per invocation.
/// - Sets the cookie name to `session` and disables the `Secure` flag for
///   local HTTP tests.
pub fn test_session_middleware() -> SessionMiddleware<CookieSessionStore> {
    SessionMiddleware::builder(CookieSessionStore::default(), Key::generate())
        .cookie_name("session".to_owned())
        .cookie_secure(false)
        .build()
}

async fn test_login(session: Session, user: web::Path<String>) -> HttpResponse {
    match session.insert(USER_ID_KEY, user.into_inner()) {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(error) => HttpResponse::InternalServerError().body(error.to_string()),
    }
}

/// Stand-in for the application's login flow: `GET /test-login/{user}`
/// stores the raw path segment as the session user.
pub fn login_route(cfg: &mut web::ServiceConfig) {
    cfg.route("/test-login/{user}", web::get().to(test_login));
}

/// Log `user` in through [`login_route`] and return the session cookie.
pub async fn session_cookie_for<S, B>(app: &S, user: &str) -> Cookie<'static>
where
    S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let res = test::call_service(
        app,
        test::TestRequest::get()
            .uri(&format!("/test-login/{user}"))
            .to_request(),
    )
    .await;
    assert!(res.status().is_success(), "test login failed");
    res.response()
        .cookies()
        .find(|cookie| cookie.name() == "session")
        .map(Cookie::into_owned)
        .expect("session cookie set by test login")
}

/// Upstream reporter returning a fixed snapshot.
pub struct StaticUpstream(pub UpstreamHealth);

impl UpstreamHealthReporter for StaticUpstream {
    fn upstream_health(&self) -> UpstreamHealth {
        self.0
    }
}

/// HTTP state over an in-process pipeline with default limits.
pub fn test_http_state() -> HttpState {
    TestPipeline::new(FakeMailProvider::new(HistoryCursor::new(1), Utc::now()))
        .http_state(RateLimitConfig::default(), StreamSettings::default())
}
