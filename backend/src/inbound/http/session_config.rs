//! Cookie session settings for the stream gateway.
//!
//! The stream endpoint only reads sessions issued elsewhere, so it needs the
//! same signing key as the login flow. Release builds require a real key
//! file; debug builds (or an explicit opt-in) fall back to a generated key.

use std::path::PathBuf;

use actix_web::cookie::{Key, SameSite};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::settings::SessionToggles;

const SESSION_KEY_MIN_LEN: usize = 64;
const FINGERPRINT_BYTES: usize = 8;

/// Build mode for session configuration validation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildMode {
    /// Debug builds tolerate a missing key file.
    Debug,
    /// Release builds require a key of at least 64 bytes.
    Release,
}

impl BuildMode {
    /// Determine the build mode from `cfg!(debug_assertions)`.
    #[must_use]
    pub fn from_debug_assertions() -> Self {
        if cfg!(debug_assertions) {
            Self::Debug
        } else {
            Self::Release
        }
    }
}

/// Resolved cookie session settings.
pub struct SessionSettings {
    /// Signing key shared with the login flow.
    pub key: Key,
    /// Whether session cookies are marked `Secure`.
    pub cookie_secure: bool,
    /// `SameSite` policy for session cookies.
    pub same_site: SameSite,
}

/// Errors raised while loading the session key.
#[derive(thiserror::Error, Debug)]
pub enum SessionConfigError {
    /// Reading the session key file failed.
    #[error("failed to read session key at {path}: {source}")]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The session key file is too short for release builds.
    #[error("session key at {path} too short: need >= {min_len} bytes, got {length}")]
    KeyTooShort {
        path: PathBuf,
        length: usize,
        min_len: usize,
    },
    /// Release builds must not allow ephemeral session keys.
    #[error("MAILPUSH_SESSION_ALLOW_EPHEMERAL must be false in release builds")]
    EphemeralNotAllowed,
}

/// Resolve session settings from validated toggles.
///
/// # Errors
///
/// Returns [`SessionConfigError`] when the key cannot be loaded and no
/// fallback is permitted.
pub fn session_settings(
    toggles: &SessionToggles,
    mode: BuildMode,
) -> Result<SessionSettings, SessionConfigError> {
    if toggles.allow_ephemeral && mode == BuildMode::Release {
        return Err(SessionConfigError::EphemeralNotAllowed);
    }
    let key = load_key(toggles, mode)?;
    info!(fingerprint = %key_fingerprint(&key), "session signing key loaded");
    Ok(SessionSettings {
        key,
        cookie_secure: toggles.cookie_secure,
        same_site: SameSite::Lax,
    })
}

fn load_key(toggles: &SessionToggles, mode: BuildMode) -> Result<Key, SessionConfigError> {
    let path = toggles.key_file.clone();
    match std::fs::read(&path) {
        Ok(mut bytes) => {
            let length = bytes.len();
            if mode == BuildMode::Release && length < SESSION_KEY_MIN_LEN {
                bytes.zeroize();
                return Err(SessionConfigError::KeyTooShort {
                    path,
                    length,
                    min_len: SESSION_KEY_MIN_LEN,
                });
            }
            let key = Key::derive_from(&bytes);
            bytes.zeroize();
            Ok(key)
        }
        Err(error) if mode == BuildMode::Debug || toggles.allow_ephemeral => {
            warn!(
                path = %path.display(),
                %error,
                "using temporary session key (dev only)"
            );
            Ok(Key::generate())
        }
        Err(error) => Err(SessionConfigError::KeyRead {
            path,
            source: error,
        }),
    }
}

/// Truncated SHA-256 of the signing key, safe to log.
#[must_use]
pub fn key_fingerprint(key: &Key) -> String {
    let digest = Sha256::digest(key.signing());
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use uuid::Uuid;

    struct TempKeyFile {
        path: PathBuf,
    }

    impl TempKeyFile {
        fn new(len: usize) -> Self {
            let path = std::env::temp_dir().join(format!("mailpush-session-key-{}", Uuid::new_v4()));
            std::fs::write(&path, vec![b'a'; len]).expect("key file written");
            Self { path }
        }
    }

    impl Drop for TempKeyFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn toggles(path: PathBuf, allow_ephemeral: bool) -> SessionToggles {
        SessionToggles {
            key_file: path,
            cookie_secure: true,
            allow_ephemeral,
        }
    }

    fn missing_path() -> PathBuf {
        std::env::temp_dir().join(format!("mailpush-missing-{}", Uuid::new_v4()))
    }

    #[rstest]
    fn release_reads_key_file() {
        let file = TempKeyFile::new(SESSION_KEY_MIN_LEN);
        let settings = session_settings(&toggles(file.path.clone(), false), BuildMode::Release)
            .expect("key loads");

        assert!(settings.cookie_secure);
        assert_eq!(
            key_fingerprint(&settings.key),
            key_fingerprint(&Key::derive_from(&[b'a'; SESSION_KEY_MIN_LEN]))
        );
    }

    #[rstest]
    fn release_rejects_short_keys() {
        let file = TempKeyFile::new(16);
        let error = session_settings(&toggles(file.path.clone(), false), BuildMode::Release)
            .err()
            .expect("short key must fail");
        assert!(matches!(error, SessionConfigError::KeyTooShort { length: 16, .. }));
    }

    #[rstest]
    fn release_requires_readable_key() {
        let error = session_settings(&toggles(missing_path(), false), BuildMode::Release)
            .err()
            .expect("missing key must fail");
        assert!(matches!(error, SessionConfigError::KeyRead { .. }));
    }

    #[rstest]
    fn release_refuses_ephemeral_keys() {
        let error = session_settings(&toggles(missing_path(), true), BuildMode::Release)
            .err()
            .expect("ephemeral must fail");
        assert!(matches!(error, SessionConfigError::EphemeralNotAllowed));
    }

    #[rstest]
    fn debug_falls_back_to_generated_key() {
        assert!(session_settings(&toggles(missing_path(), false), BuildMode::Debug).is_ok());
    }

    #[rstest]
    fn fingerprint_is_short_hex() {
        let fingerprint = key_fingerprint(&Key::generate());
        assert_eq!(fingerprint.len(), 16);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
