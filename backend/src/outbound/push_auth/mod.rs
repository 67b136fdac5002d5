//! Push transport identity-token verification.

mod jwks_verifier;

pub use jwks_verifier::{GOOGLE_ISSUERS, HttpJwksSource, JwksSource, JwksVerifier, JwksVerifierConfig};
