//! Authentication of push-transport deliveries.
//!
//! Two mechanisms are accepted: a signed OIDC identity token presented as a
//! bearer credential, or a legacy shared verification token. A bearer header
//! is authoritative; when present the shared token is not consulted.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

use crate::domain::ports::{PushIdentity, PushTokenError, PushTokenVerifier};

/// Credentials extracted from one webhook request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushCredentials<'a> {
    /// Token from `Authorization: Bearer <token>`.
    pub bearer: Option<&'a str>,
    /// Shared token from the channel-token header or `token` query parameter.
    pub shared_token: Option<&'a str>,
}

/// How a delivery was authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushPrincipal {
    /// A verified identity token.
    Identity(PushIdentity),
    /// The shared verification token matched.
    SharedToken,
}

/// Reasons a delivery was not authenticated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushAuthError {
    /// No credential was presented.
    #[error("push delivery carried no credentials")]
    MissingCredentials,
    /// A bearer token was presented but identity tokens are not configured.
    #[error("identity tokens are not accepted by this deployment")]
    BearerNotAccepted,
    /// The identity token failed verification.
    #[error("push identity token rejected: {0}")]
    InvalidBearer(String),
    /// The token was issued to an unexpected service account.
    #[error("push identity token issued to an unexpected service account")]
    UnexpectedServiceAccount,
    /// The shared token did not match.
    #[error("push verification token mismatch")]
    InvalidSharedToken,
    /// Verification keys could not be obtained; the delivery should be retried.
    #[error("push identity verification unavailable: {0}")]
    VerifierUnavailable(String),
}

impl PushAuthError {
    /// Whether the failure is ours rather than the caller's.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::VerifierUnavailable(_))
    }
}

/// Compare two secrets without leaking where they differ.
///
/// # Examples
/// ```
/// use mailpush::domain::constant_time_eq;
///
/// assert!(constant_time_eq("s3cret", "s3cret"));
/// assert!(!constant_time_eq("s3cret", "s3cre"));
/// ```
#[must_use]
pub fn constant_time_eq(presented: &str, expected: &str) -> bool {
    bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}

/// Verifies push deliveries against the configured mechanisms.
pub struct PushAuthenticator {
    verifier: Option<Arc<dyn PushTokenVerifier>>,
    shared_token: Option<Zeroizing<String>>,
    service_account: Option<String>,
}

impl PushAuthenticator {
    /// Build an authenticator.
    ///
    /// `verifier` enables bearer identity tokens, `shared_token` enables the
    /// legacy verification token, and `service_account` pins the identity
    /// token's email claim.
    pub fn new(
        verifier: Option<Arc<dyn PushTokenVerifier>>,
        shared_token: Option<String>,
        service_account: Option<String>,
    ) -> Self {
        Self {
            verifier,
            shared_token: shared_token.filter(|t| !t.is_empty()).map(Zeroizing::new),
            service_account: service_account.map(|email| email.to_ascii_lowercase()),
        }
    }

    /// Authenticate one delivery.
    pub async fn authenticate(
        &self,
        credentials: PushCredentials<'_>,
    ) -> Result<PushPrincipal, PushAuthError> {
        if let Some(bearer) = credentials.bearer {
            return self.verify_bearer(bearer).await;
        }
        match (credentials.shared_token, self.shared_token.as_ref()) {
            (Some(presented), Some(expected)) if constant_time_eq(presented, expected) => {
                Ok(PushPrincipal::SharedToken)
            }
            (Some(_), _) => Err(PushAuthError::InvalidSharedToken),
            (None, _) => Err(PushAuthError::MissingCredentials),
        }
    }

    async fn verify_bearer(&self, token: &str) -> Result<PushPrincipal, PushAuthError> {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or(PushAuthError::BearerNotAccepted)?;
        let identity = verifier.verify(token).await.map_err(|error| match error {
            PushTokenError::KeysUnavailable { message } => {
                PushAuthError::VerifierUnavailable(message)
            }
            PushTokenError::Invalid { message } => PushAuthError::InvalidBearer(message),
        })?;

        if let Some(expected) = &self.service_account {
            let matches = identity.email_verified
                && identity
                    .email
                    .as_deref()
                    .is_some_and(|email| email.eq_ignore_ascii_case(expected));
            if !matches {
                debug!(subject = %identity.subject, "push token service account mismatch");
                return Err(PushAuthError::UnexpectedServiceAccount);
            }
        }
        Ok(PushPrincipal::Identity(identity))
    }
}
