//! Driven port verifying signed identity tokens from the push transport.

use async_trait::async_trait;

use super::define_port_error;

/// Claims extracted from a verified push identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushIdentity {
    /// Token subject.
    pub subject: String,
    /// Service account email, when present.
    pub email: Option<String>,
    /// Whether the issuer verified the email.
    pub email_verified: bool,
}

define_port_error! {
    /// Errors raised while verifying a push identity token.
    pub enum PushTokenError {
        /// The token failed signature, audience, issuer or expiry checks.
        Invalid { message: String } => "push token rejected: {message}",
        /// Verification keys could not be obtained.
        KeysUnavailable { message: String } => "push token keys unavailable: {message}",
    }
}

/// Port validating bearer tokens presented by the push transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushTokenVerifier: Send + Sync {
    /// Verify `token` and return its identity claims.
    async fn verify(&self, token: &str) -> Result<PushIdentity, PushTokenError>;
}
