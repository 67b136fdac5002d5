//! Application settings loaded via OrthoConfig.
//!
//! [`AppSettings`] is the raw layer (environment `MAILPUSH_*`, CLI flags and
//! an optional config file). [`AppSettings::validate`] turns it into a
//! [`RuntimeConfig`] holding concrete component configs; anything missing or
//! malformed fails startup with a [`SettingsError`].

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use ortho_config::OrthoConfig;
use reqwest::Url;
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::domain::{
    BreakerConfig, PushProcessingConfig, RateLimitConfig, ResilienceConfig,
};
use crate::inbound::http::state::StreamSettings;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PROVIDER_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/";
const DEFAULT_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const DEFAULT_SESSION_KEY_FILE: &str = "/var/run/secrets/session_key";
const DEFAULT_LOCK_TTL_SECS: u64 = 300;
/// Longest accepted TTL, window or timeout (30 days).
const MAX_PERIOD_SECS: u64 = 30 * 24 * 60 * 60;

/// Raw configuration values. Every field is optional here; typed accessors
/// and [`AppSettings::validate`] supply defaults and enforce requirements.
#[derive(Debug, Clone, Default, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "MAILPUSH")]
pub struct AppSettings {
    /// Listen address for the HTTP server.
    pub bind_addr: Option<String>,
    /// Redis URL for lock, dedupe and broker. In-process adapters when unset.
    pub redis_url: Option<String>,
    /// PostgreSQL URL for watches and cursors. In-process store when unset.
    pub database_url: Option<String>,
    /// Provider REST API root.
    pub provider_base_url: Option<String>,
    /// Bearer credential for provider calls.
    pub provider_access_token: Option<String>,
    /// Pub/sub topic the provider pushes notifications to.
    pub push_topic: Option<String>,
    /// Expected `aud` of push identity tokens.
    pub push_audience: Option<String>,
    /// Expected service account email of push identity tokens.
    pub push_service_account: Option<String>,
    /// Key set URL for push identity tokens.
    pub push_jwks_url: Option<String>,
    /// Legacy shared verification token.
    pub push_verification_token: Option<String>,
    /// Secret that skips webhook rate limiting.
    pub rate_limit_bypass_token: Option<String>,
    pub rate_limit_max_requests: Option<u32>,
    pub rate_limit_window_secs: Option<u64>,
    /// Key rate limits on forwarding headers; only behind a trusted proxy.
    pub trust_forwarded_for: Option<bool>,
    pub stream_max_connections: Option<usize>,
    pub stream_heartbeat_secs: Option<u64>,
    pub lock_ttl_secs: Option<u64>,
    pub dedupe_ttl_secs: Option<u64>,
    pub reconcile_timeout_secs: Option<u64>,
    pub upstream_max_concurrent: Option<usize>,
    pub upstream_call_timeout_secs: Option<u64>,
    pub breaker_error_rate_percent: Option<u8>,
    pub breaker_min_volume: Option<u32>,
    pub breaker_window_secs: Option<u64>,
    pub breaker_cooldown_secs: Option<u64>,
    pub upstream_max_retries: Option<u32>,
    /// Cookie session signing key file.
    pub session_key_file: Option<PathBuf>,
    pub session_cookie_secure: Option<bool>,
    /// Allow a generated session key when the key file is unreadable.
    pub session_allow_ephemeral: Option<bool>,
}

/// Errors raised while validating settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// A required value is absent or blank.
    #[error("missing required setting MAILPUSH_{name}")]
    Missing { name: &'static str },
    /// A value is present but malformed.
    #[error("invalid MAILPUSH_{name}={value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    /// Neither push authentication mechanism is configured.
    #[error("configure MAILPUSH_PUSH_AUDIENCE or MAILPUSH_PUSH_VERIFICATION_TOKEN")]
    NoPushAuthentication,
}

/// Provider client settings.
#[derive(Clone)]
pub struct ProviderSettings {
    pub base_url: Url,
    pub access_token: Zeroizing<String>,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("base_url", &self.base_url.as_str())
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Push authentication settings.
#[derive(Debug, Clone)]
pub struct PushAuthSettings {
    /// Enables identity-token verification when set.
    pub audience: Option<String>,
    pub service_account: Option<String>,
    pub jwks_url: Url,
    /// Enables the legacy shared token when set.
    pub verification_token: Option<String>,
}

/// Cookie session toggles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToggles {
    pub key_file: PathBuf,
    pub cookie_secure: bool,
    pub allow_ephemeral: bool,
}

/// Validated configuration for every component.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub bind_addr: SocketAddr,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub provider: ProviderSettings,
    pub push_topic: String,
    pub push_auth: PushAuthSettings,
    pub rate_limit: RateLimitConfig,
    pub rate_limit_bypass: Option<String>,
    pub trust_forwarded_for: bool,
    pub stream: StreamSettings,
    pub lock_ttl: Duration,
    pub processing: PushProcessingConfig,
    pub resilience: ResilienceConfig,
    pub session: SessionToggles,
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|raw| raw.trim())
        .filter(|raw| !raw.is_empty())
        .map(str::to_owned)
}

fn required(value: Option<&String>, name: &'static str) -> Result<String, SettingsError> {
    non_blank(value).ok_or(SettingsError::Missing { name })
}

fn parse_url(raw: &str, name: &'static str) -> Result<Url, SettingsError> {
    let url = Url::parse(raw).map_err(|error| SettingsError::Invalid {
        name,
        value: raw.to_owned(),
        reason: error.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(SettingsError::Invalid {
            name,
            value: raw.to_owned(),
            reason: "URL cannot carry a path".to_owned(),
        });
    }
    Ok(url)
}

fn positive_secs(value: Option<u64>, default: u64, name: &'static str) -> Result<Duration, SettingsError> {
    match value.unwrap_or(default) {
        0 => Err(SettingsError::Invalid {
            name,
            value: "0".to_owned(),
            reason: "must be at least one second".to_owned(),
        }),
        secs if secs > MAX_PERIOD_SECS => Err(SettingsError::Invalid {
            name,
            value: secs.to_string(),
            reason: format!("must be at most {MAX_PERIOD_SECS} seconds"),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

impl AppSettings {
    /// Listen address, defaulting to `0.0.0.0:8080`.
    pub fn bind_addr(&self) -> &str {
        self.bind_addr.as_deref().unwrap_or(DEFAULT_BIND_ADDR)
    }

    /// Provider API root, defaulting to the public Gmail endpoint.
    pub fn provider_base_url(&self) -> &str {
        self.provider_base_url
            .as_deref()
            .unwrap_or(DEFAULT_PROVIDER_BASE_URL)
    }

    /// Push identity key set URL, defaulting to Google's certificates.
    pub fn push_jwks_url(&self) -> &str {
        self.push_jwks_url.as_deref().unwrap_or(DEFAULT_JWKS_URL)
    }

    /// Session key file path.
    pub fn session_key_file(&self) -> PathBuf {
        self.session_key_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_KEY_FILE))
    }

    /// Validate raw settings into component configs.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when a required value is missing or any
    /// value cannot be parsed.
    pub fn validate(&self) -> Result<RuntimeConfig, SettingsError> {
        let bind_addr = self
            .bind_addr()
            .parse::<SocketAddr>()
            .map_err(|error| SettingsError::Invalid {
                name: "BIND_ADDR",
                value: self.bind_addr().to_owned(),
                reason: error.to_string(),
            })?;

        let provider = ProviderSettings {
            base_url: parse_url(self.provider_base_url(), "PROVIDER_BASE_URL")?,
            access_token: Zeroizing::new(required(
                self.provider_access_token.as_ref(),
                "PROVIDER_ACCESS_TOKEN",
            )?),
        };
        let push_topic = required(self.push_topic.as_ref(), "PUSH_TOPIC")?;

        let push_auth = PushAuthSettings {
            audience: non_blank(self.push_audience.as_ref()),
            service_account: non_blank(self.push_service_account.as_ref()),
            jwks_url: parse_url(self.push_jwks_url(), "PUSH_JWKS_URL")?,
            verification_token: non_blank(self.push_verification_token.as_ref()),
        };
        if push_auth.audience.is_none() && push_auth.verification_token.is_none() {
            return Err(SettingsError::NoPushAuthentication);
        }

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            max_requests: self.rate_limit_max_requests.unwrap_or(defaults.max_requests),
            window: positive_secs(
                self.rate_limit_window_secs,
                defaults.window.as_secs(),
                "RATE_LIMIT_WINDOW_SECS",
            )?,
        };

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            max_connections: self
                .stream_max_connections
                .unwrap_or(stream_defaults.max_connections),
            heartbeat: positive_secs(
                self.stream_heartbeat_secs,
                stream_defaults.heartbeat.as_secs(),
                "STREAM_HEARTBEAT_SECS",
            )?,
        };

        let processing_defaults = PushProcessingConfig::default();
        let processing = PushProcessingConfig {
            dedupe_ttl: positive_secs(
                self.dedupe_ttl_secs,
                processing_defaults.dedupe_ttl.as_secs(),
                "DEDUPE_TTL_SECS",
            )?,
            reconcile_timeout: positive_secs(
                self.reconcile_timeout_secs,
                processing_defaults.reconcile_timeout.as_secs(),
                "RECONCILE_TIMEOUT_SECS",
            )?,
        };

        Ok(RuntimeConfig {
            bind_addr,
            redis_url: non_blank(self.redis_url.as_ref()),
            database_url: non_blank(self.database_url.as_ref()),
            provider,
            push_topic,
            push_auth,
            rate_limit,
            rate_limit_bypass: non_blank(self.rate_limit_bypass_token.as_ref()),
            trust_forwarded_for: self.trust_forwarded_for.unwrap_or(false),
            stream,
            lock_ttl: positive_secs(self.lock_ttl_secs, DEFAULT_LOCK_TTL_SECS, "LOCK_TTL_SECS")?,
            processing,
            resilience: self.resilience()?,
            session: SessionToggles {
                key_file: self.session_key_file(),
                cookie_secure: self.session_cookie_secure.unwrap_or(true),
                allow_ephemeral: self.session_allow_ephemeral.unwrap_or(false),
            },
        })
    }

    fn resilience(&self) -> Result<ResilienceConfig, SettingsError> {
        let defaults = ResilienceConfig::default();
        let breaker_defaults = BreakerConfig::default();

        let max_concurrent_calls = self
            .upstream_max_concurrent
            .unwrap_or(defaults.max_concurrent_calls);
        if max_concurrent_calls == 0 {
            return Err(SettingsError::Invalid {
                name: "UPSTREAM_MAX_CONCURRENT",
                value: "0".to_owned(),
                reason: "at least one concurrent call is required".to_owned(),
            });
        }
        let error_rate_threshold_percent = self
            .breaker_error_rate_percent
            .unwrap_or(breaker_defaults.error_rate_threshold_percent);
        if !(1..=100).contains(&error_rate_threshold_percent) {
            return Err(SettingsError::Invalid {
                name: "BREAKER_ERROR_RATE_PERCENT",
                value: error_rate_threshold_percent.to_string(),
                reason: "must be within 1..=100".to_owned(),
            });
        }

        Ok(ResilienceConfig {
            max_concurrent_calls,
            call_timeout: positive_secs(
                self.upstream_call_timeout_secs,
                defaults.call_timeout.as_secs(),
                "UPSTREAM_CALL_TIMEOUT_SECS",
            )?,
            max_retries: self.upstream_max_retries.unwrap_or(defaults.max_retries),
            breaker: BreakerConfig {
                error_rate_threshold_percent,
                min_volume: self.breaker_min_volume.unwrap_or(breaker_defaults.min_volume),
                window: positive_secs(
                    self.breaker_window_secs,
                    breaker_defaults.window.as_secs(),
                    "BREAKER_WINDOW_SECS",
                )?,
                cooldown: positive_secs(
                    self.breaker_cooldown_secs,
                    breaker_defaults.cooldown.as_secs(),
                    "BREAKER_COOLDOWN_SECS",
                )?,
            },
            ..defaults
        })
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
