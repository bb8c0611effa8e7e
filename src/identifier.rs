//! Identifier parsing and validation.
//!
//! An identifier is either a 43-character content hash (a transaction id,
//! base64url alphabet) or a human name resolved by the wayfinder. Both are
//! validated against a bounded character class *before* any network I/O —
//! malformed input must never reach the wayfinder.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::VerifyError;

const TX_ID_LEN: usize = 43;
const MAX_NAME_LEN: usize = 253;

/// An opaque string naming a content root. Immutable for the lifetime of a
/// verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier(String);

impl Identifier {
    /// Parse and validate an identifier string, rejecting anything outside
    /// the expected character classes before any I/O is attempted.
    pub fn parse(raw: &str) -> Result<Self, VerifyError> {
        if raw.is_empty() {
            return Err(VerifyError::InvalidIdentifier("empty identifier".into()));
        }

        if is_tx_id_shaped(raw) || is_name_shaped(raw) {
            Ok(Identifier(raw.to_string()))
        } else {
            Err(VerifyError::InvalidIdentifier(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this identifier is already a 43-character content hash, as
    /// opposed to a name the wayfinder must resolve.
    pub fn is_tx_id(&self) -> bool {
        is_tx_id_shaped(&self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 43-character base64url transaction id, as declared in manifest
/// `paths`/`index`/`fallback` entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(String);

impl TxId {
    pub fn parse(raw: &str) -> Result<Self, VerifyError> {
        if is_tx_id_shaped(raw) {
            Ok(TxId(raw.to_string()))
        } else {
            Err(VerifyError::InvalidIdentifier(format!(
                "malformed transaction id: {raw}"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn is_tx_id_shaped(s: &str) -> bool {
    s.len() == TX_ID_LEN && s.bytes().all(is_base64url_byte)
}

fn is_base64url_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// Names are a bounded, DNS-label-like character class: alphanumerics,
/// hyphens, underscores, and dots, capped at a generous length.
fn is_name_shaped(s: &str) -> bool {
    s.len() <= MAX_NAME_LEN
        && !s.starts_with('.')
        && !s.starts_with('-')
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_tx_id() {
        let id = "a".repeat(43);
        assert!(Identifier::parse(&id).is_ok());
        assert!(Identifier::parse(&id).unwrap().is_tx_id());
    }

    #[test]
    fn accepts_valid_name() {
        let id = Identifier::parse("my-app_v2.example").unwrap();
        assert!(!id.is_tx_id());
    }

    #[test]
    fn rejects_empty() {
        assert!(Identifier::parse("").is_err());
    }

    #[test]
    fn rejects_path_traversal_lookalikes() {
        assert!(Identifier::parse("../../etc/passwd").is_err());
        assert!(Identifier::parse("a/b").is_err());
    }

    #[test]
    fn rejects_oversized_tx_id_lookalike() {
        let too_long = "a".repeat(44);
        // 44 chars of base64url alphabet is not tx-id shaped, but is still
        // name-shaped (dots/hyphens/underscores/alnum) so it is accepted as
        // a name, not rejected outright.
        assert!(Identifier::parse(&too_long).is_ok());
        assert!(!Identifier::parse(&too_long).unwrap().is_tx_id());
    }

    #[test]
    fn rejects_control_characters() {
        assert!(Identifier::parse("abc\ndef").is_err());
    }

    #[test]
    fn tx_id_rejects_wrong_length() {
        assert!(TxId::parse(&"a".repeat(42)).is_err());
        assert!(TxId::parse(&"a".repeat(43)).is_ok());
    }
}
