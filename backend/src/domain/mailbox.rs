//! Mailbox identities, history cursors, and the per-account sync records.
//!
//! Identifiers are validated once at the edge and then carried as newtypes so
//! topic names and lock keys built from them are always well formed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// Validation errors for identifier newtypes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierValidationError {
    /// The identifier was blank.
    #[error("{kind} must not be empty")]
    Empty {
        /// Identifier kind for diagnostics.
        kind: &'static str,
    },
    /// The identifier contained whitespace or control characters.
    #[error("{kind} must not contain whitespace or control characters")]
    InvalidCharacters {
        /// Identifier kind for diagnostics.
        kind: &'static str,
    },
    /// The mailbox address was not shaped like `local@domain`.
    #[error("mailbox address must contain a local part and a domain")]
    MalformedAddress,
}

fn validate_token(raw: &str, kind: &'static str) -> Result<(), IdentifierValidationError> {
    if raw.is_empty() {
        return Err(IdentifierValidationError::Empty { kind });
    }
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(IdentifierValidationError::InvalidCharacters { kind });
    }
    Ok(())
}

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a raw identifier.
            ///
            /// # Errors
            ///
            /// Rejects blank values and values containing whitespace.
            pub fn new(raw: impl Into<String>) -> Result<Self, IdentifierValidationError> {
                let raw = raw.into();
                validate_token(&raw, $kind)?;
                Ok(Self(raw))
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

string_identifier!(
    /// Identifier of a connected mail account.
    AccountId,
    "account id"
);

string_identifier!(
    /// Identifier of the application user owning one or more accounts.
    UserId,
    "user id"
);

string_identifier!(
    /// Provider message identifier.
    MessageId,
    "message id"
);

/// Mailbox address as reported by the provider's push transport.
///
/// Addresses are compared case-insensitively, so they are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MailboxAddress(String);

impl MailboxAddress {
    /// Validate and normalise a mailbox address.
    ///
    /// # Errors
    ///
    /// Rejects blank values, whitespace, and values without `local@domain`.
    ///
    /// # Examples
    /// ```
    /// use mailpush::domain::MailboxAddress;
    ///
    /// let address = MailboxAddress::new("Ada@Example.com").expect("valid address");
    /// assert_eq!(address.as_str(), "ada@example.com");
    /// ```
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentifierValidationError> {
        let raw = raw.into().trim().to_lowercase();
        validate_token(&raw, "mailbox address")?;
        match raw.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(Self(raw)),
            _ => Err(IdentifierValidationError::MalformedAddress),
        }
    }

    /// Borrow the address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Short SHA-256 fingerprint used in logs instead of the raw address.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(12);
        encoded
    }
}

impl fmt::Display for MailboxAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MailboxAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Position in the provider's change history.
///
/// History ids are unsigned and totally ordered. Providers emit them either as
/// JSON numbers or decimal strings; both forms are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct HistoryCursor(u64);

impl HistoryCursor {
    /// Wrap a raw history id.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw history id.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for HistoryCursor {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for HistoryCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for HistoryCursor {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

impl<'de> Deserialize<'de> for HistoryCursor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(Self(value)),
            Raw::Text(text) => text.parse().map_err(|error| {
                serde::de::Error::custom(format!("invalid history id {text:?}: {error}"))
            }),
        }
    }
}

/// Provider push registration for one connected account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountWatch {
    /// Connected account.
    pub account_id: AccountId,
    /// User who receives change events for this account.
    pub user_id: UserId,
    /// Mailbox the provider reports in push notifications.
    pub mailbox_address: MailboxAddress,
    /// Cursor the provider returned when the watch was registered.
    pub provider_cursor: HistoryCursor,
    /// When the provider stops delivering notifications unless renewed.
    pub expires_at: DateTime<Utc>,
}

/// Reconciliation watermark for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCursor {
    /// Account the watermark belongs to.
    pub account_id: AccountId,
    /// Highest history id fully reconciled.
    pub last_cursor: HistoryCursor,
    /// Last time the watermark moved.
    pub updated_at: DateTime<Utc>,
}
