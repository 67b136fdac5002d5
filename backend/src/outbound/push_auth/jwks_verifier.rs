//! RS256 identity-token verifier backed by a cached JSON Web Key Set.
//!
//! Keys are selected by the token header's `kid`. An unknown `kid` triggers a
//! refetch of the key set, at most once per `min_refresh_interval`, so a flood
//! of forged tokens cannot turn into a flood of JWKS requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use mockable::Clock;
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::domain::ports::{PushIdentity, PushTokenError, PushTokenVerifier};

/// Issuers used by the provider's push identity tokens.
pub const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Source of the signing key set.
#[async_trait]
pub trait JwksSource: Send + Sync {
    /// Fetch the current key set.
    async fn fetch(&self) -> Result<JwkSet, String>;
}

/// Fetches the key set over HTTPS.
pub struct HttpJwksSource {
    client: Client,
    url: Url,
}

impl HttpJwksSource {
    /// Build a source for `url` with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl JwksSource for HttpJwksSource {
    async fn fetch(&self) -> Result<JwkSet, String> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|error| format!("JWKS request failed: {error}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("JWKS endpoint returned {}", status.as_u16()));
        }
        response
            .json::<JwkSet>()
            .await
            .map_err(|error| format!("invalid JWKS payload: {error}"))
    }
}

/// Verification policy.
#[derive(Debug, Clone)]
pub struct JwksVerifierConfig {
    /// Expected `aud` claim.
    pub audience: String,
    /// Accepted `iss` claims.
    pub issuers: Vec<String>,
    /// Minimum spacing between key set refreshes.
    pub min_refresh_interval: Duration,
    /// Clock skew tolerance in seconds.
    pub leeway_seconds: u64,
}

impl JwksVerifierConfig {
    /// Policy for the provider's issuers with a 5 minute refresh floor.
    pub fn for_audience(audience: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            issuers: GOOGLE_ISSUERS.iter().map(|s| (*s).to_owned()).collect(),
            min_refresh_interval: Duration::from_secs(300),
            leeway_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdentityClaims {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

#[derive(Default)]
struct KeyCache {
    keys: HashMap<String, DecodingKey>,
    refreshed_at: Option<DateTime<Utc>>,
}

/// [`PushTokenVerifier`] validating RS256 tokens against a key set.
pub struct JwksVerifier {
    source: Arc<dyn JwksSource>,
    clock: Arc<dyn Clock>,
    validation: Validation,
    min_refresh_interval: Duration,
    cache: RwLock<KeyCache>,
    refresh_gate: Mutex<()>,
}

impl JwksVerifier {
    pub fn new(
        source: Arc<dyn JwksSource>,
        clock: Arc<dyn Clock>,
        config: JwksVerifierConfig,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_issuer(config.issuers.as_slice());
        validation.leeway = config.leeway_seconds;
        Self {
            source,
            clock,
            validation,
            min_refresh_interval: config.min_refresh_interval,
            cache: RwLock::new(KeyCache::default()),
            refresh_gate: Mutex::new(()),
        }
    }

    async fn cached_key(&self, kid: &str) -> Option<DecodingKey> {
        self.cache.read().await.keys.get(kid).cloned()
    }

    fn refresh_due(&self, cache: &KeyCache) -> bool {
        let Some(refreshed_at) = cache.refreshed_at else {
            return true;
        };
        let elapsed = self.clock.utc().signed_duration_since(refreshed_at);
        elapsed.to_std().unwrap_or(Duration::ZERO) >= self.min_refresh_interval
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, PushTokenError> {
        if let Some(key) = self.cached_key(kid).await {
            return Ok(key);
        }

        let _gate = self.refresh_gate.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(key) = self.cached_key(kid).await {
            return Ok(key);
        }
        if !self.refresh_due(&*self.cache.read().await) {
            return Err(PushTokenError::invalid(format!("unknown signing key {kid}")));
        }

        let set = self.source.fetch().await.map_err(|message| {
            warn!(%message, "push token key refresh failed");
            PushTokenError::keys_unavailable(message)
        })?;
        let keys = decode_key_set(&set);
        debug!(keys = keys.len(), "refreshed push token signing keys");

        let mut cache = self.cache.write().await;
        cache.keys = keys;
        cache.refreshed_at = Some(self.clock.utc());
        cache
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| PushTokenError::invalid(format!("unknown signing key {kid}")))
    }
}

fn decode_key_set(set: &JwkSet) -> HashMap<String, DecodingKey> {
    set.keys
        .iter()
        .filter_map(|jwk| {
            let kid = jwk.common.key_id.clone()?;
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => Some((kid, key)),
                Err(error) => {
                    warn!(%kid, %error, "skipping unusable signing key");
                    None
                }
            }
        })
        .collect()
}

fn map_decode_error(error: &jsonwebtoken::errors::Error) -> PushTokenError {
    let reason = match error.kind() {
        ErrorKind::ExpiredSignature => "token expired",
        ErrorKind::ImmatureSignature => "token not yet valid",
        ErrorKind::InvalidAudience => "unexpected audience",
        ErrorKind::InvalidIssuer => "unexpected issuer",
        ErrorKind::InvalidSignature => "signature mismatch",
        ErrorKind::InvalidAlgorithm => "unexpected algorithm",
        _ => "malformed token",
    };
    PushTokenError::invalid(reason)
}

#[async_trait]
impl PushTokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<PushIdentity, PushTokenError> {
        let header = decode_header(token).map_err(|error| map_decode_error(&error))?;
        if header.alg != Algorithm::RS256 {
            return Err(PushTokenError::invalid("unexpected algorithm"));
        }
        let kid = header
            .kid
            .ok_or_else(|| PushTokenError::invalid("token header has no key id"))?;
        let key = self.key_for(&kid).await?;

        let claims = decode::<IdentityClaims>(token, &key, &self.validation)
            .map_err(|error| map_decode_error(&error))?
            .claims;
        Ok(PushIdentity {
            subject: claims.sub,
            email: claims.email,
            email_verified: claims.email_verified,
        })
    }
}

#[cfg(test)]
mod tests {
    //! Key selection and refresh throttling. Signature verification itself
    //! is covered by `jsonwebtoken`.

    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use crate::test_support::resilience::MutableClock;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        result: Result<&'static str, &'static str>,
    }

    impl CountingSource {
        fn serving(json: &'static str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result: Ok(json),
            })
        }

        fn failing(message: &'static str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result: Err(message),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JwksSource for CountingSource {
        async fn fetch(&self) -> Result<JwkSet, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.result {
                Ok(json) => serde_json::from_str(json).map_err(|error| error.to_string()),
                Err(message) => Err(message.to_owned()),
            }
        }
    }

    fn verifier_with_clock(source: Arc<CountingSource>, clock: Arc<MutableClock>) -> JwksVerifier {
        JwksVerifier::new(
            source,
            clock,
            JwksVerifierConfig::for_audience("https://push.example.test/webhook"),
        )
    }

    fn verifier(source: Arc<CountingSource>) -> JwksVerifier {
        verifier_with_clock(source, Arc::new(MutableClock::new(Utc::now())))
    }

    fn unsigned_token(header: &str) -> String {
        let encode = |part: &str| URL_SAFE_NO_PAD.encode(part.as_bytes());
        format!("{}.{}.c2ln", encode(header), encode(r#"{"sub":"1"}"#))
    }

    #[rstest]
    #[tokio::test]
    async fn rejects_garbage_tokens_without_fetching_keys() {
        let source = CountingSource::serving(r#"{"keys":[]}"#);
        let error = verifier(source.clone())
            .verify("not-a-jwt")
            .await
            .expect_err("garbage must fail");

        assert!(matches!(error, PushTokenError::Invalid { .. }));
        assert_eq!(source.calls(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn rejects_tokens_without_key_id() {
        let source = CountingSource::serving(r#"{"keys":[]}"#);
        let token = unsigned_token(r#"{"alg":"RS256","typ":"JWT"}"#);
        let error = verifier(source.clone())
            .verify(&token)
            .await
            .expect_err("kid is required");

        assert!(matches!(error, PushTokenError::Invalid { message } if message.contains("key id")));
        assert_eq!(source.calls(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn rejects_symmetric_algorithms() {
        let source = CountingSource::serving(r#"{"keys":[]}"#);
        let token = unsigned_token(r#"{"alg":"HS256","kid":"k1"}"#);
        let error = verifier(source.clone())
            .verify(&token)
            .await
            .expect_err("HS256 must be refused");

        assert!(matches!(error, PushTokenError::Invalid { .. }));
        assert_eq!(source.calls(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_key_refreshes_at_most_once_per_interval() {
        let source = CountingSource::serving(r#"{"keys":[]}"#);
        let verifier = verifier(source.clone());
        let token = unsigned_token(r#"{"alg":"RS256","kid":"rotated"}"#);

        for _ in 0..3 {
            let error = verifier.verify(&token).await.expect_err("no such key");
            assert!(matches!(error, PushTokenError::Invalid { .. }));
        }
        assert_eq!(source.calls(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_key_refreshes_again_after_interval() {
        let source = CountingSource::serving(r#"{"keys":[]}"#);
        let clock = Arc::new(MutableClock::new(Utc::now()));
        let verifier = verifier_with_clock(source.clone(), clock.clone());
        let token = unsigned_token(r#"{"alg":"RS256","kid":"rotated"}"#);

        let _ = verifier.verify(&token).await;
        clock.advance(Duration::from_secs(301));
        let _ = verifier.verify(&token).await;

        assert_eq!(source.calls(), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn source_failure_is_reported_as_unavailable() {
        let source = CountingSource::failing("connection refused");
        let token = unsigned_token(r#"{"alg":"RS256","kid":"k1"}"#);
        let error = verifier(source)
            .verify(&token)
            .await
            .expect_err("keys unavailable");

        assert!(matches!(error, PushTokenError::KeysUnavailable { .. }));
    }

    #[rstest]
    fn default_policy_accepts_both_issuer_spellings() {
        let config = JwksVerifierConfig::for_audience("aud");
        assert_eq!(
            config.issuers,
            vec![
                "accounts.google.com".to_owned(),
                "https://accounts.google.com".to_owned()
            ]
        );
    }
}
