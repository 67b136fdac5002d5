//! Backend entry-point: loads settings, connects adapters and serves the
//! webhook, stream and health endpoints.

mod server;

use std::ffi::OsString;
use std::sync::Arc;

use actix_web::web;
#[cfg(feature = "metrics")]
use actix_web_prom::PrometheusMetricsBuilder;
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use mailpush::bootstrap::{Pipeline, PipelineSettings, connect_adapters, push_authenticator};
#[cfg(not(feature = "metrics"))]
use mailpush::domain::ports::NoOpSyncMetrics;
use mailpush::domain::ports::SyncMetrics;
use mailpush::domain::SlidingWindowLimiter;
use mailpush::inbound::http::health::HealthState;
use mailpush::inbound::http::session_config::{BuildMode, session_settings};
#[cfg(feature = "metrics")]
use mailpush::outbound::metrics::PrometheusSyncMetrics;
use mailpush::settings::AppSettings;

use server::{ServerConfig, create_server};

/// Application bootstrap.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let mut args: Vec<OsString> = std::env::args_os().collect();
    if args.is_empty() {
        args.push(OsString::from("mailpush"));
    }
    let settings = AppSettings::load_from_iter(args)
        .map_err(|e| std::io::Error::other(format!("failed to load configuration: {e}")))?;
    let config = settings.validate().map_err(std::io::Error::other)?;
    let session = session_settings(&config.session, BuildMode::from_debug_assertions())
        .map_err(std::io::Error::other)?;

    #[cfg(feature = "metrics")]
    let prometheus = PrometheusMetricsBuilder::new("mailpush")
        .endpoint("/metrics")
        .build()
        .map_err(|e| std::io::Error::other(format!("failed to configure metrics: {e}")))?;
    #[cfg(feature = "metrics")]
    let metrics: Arc<dyn SyncMetrics> = Arc::new(
        PrometheusSyncMetrics::new(&prometheus.registry)
            .map_err(|e| std::io::Error::other(format!("sync metrics registration failed: {e}")))?,
    );
    #[cfg(not(feature = "metrics"))]
    let metrics: Arc<dyn SyncMetrics> = Arc::new(NoOpSyncMetrics);

    let health_state = web::Data::new(HealthState::new());
    let adapters = connect_adapters(&config, metrics)
        .await
        .map_err(std::io::Error::other)?;
    let clock = adapters.clock.clone();
    let pipeline = Pipeline::assemble(adapters, &PipelineSettings::from(&config));

    let authenticator = push_authenticator(&config.push_auth, Arc::new(DefaultClock))
        .map_err(std::io::Error::other)?;
    let limiter = SlidingWindowLimiter::new(
        config.rate_limit,
        clock,
        config.rate_limit_bypass.clone(),
    );
    let http_state = pipeline
        .http_state(Arc::new(authenticator), Arc::new(limiter), config.stream)
        .with_trusted_proxy(config.trust_forwarded_for);

    let server_config = ServerConfig::new(
        session,
        config.bind_addr,
        #[cfg(feature = "metrics")]
        prometheus,
    );
    info!(bind_addr = %server_config.bind_addr(), "starting mailpush");

    let server = create_server(health_state.clone(), http_state, server_config)?;
    let result = server.await;
    health_state.mark_unhealthy();
    result
}
