//! Message / lifecycle controller.
//!
//! `INIT_WAYFINDER`, `CLEAR_CACHE`, and `CLEAR_VERIFICATION` as a typed,
//! tag-discriminated enum. Install/activate/skip-waiting/claim have no
//! analogue in a library crate — they are the points a host process
//! integrates at ([`crate::VerifierService::new`] /
//! [`crate::VerifierService::shutdown`]), documented rather than
//! reproduced as literal no-op methods.

use serde::Deserialize;

use crate::identifier::Identifier;
use crate::wayfinder::WayfinderConfig;

/// A control message sent to the verifier by a controlled client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "INIT_WAYFINDER")]
    InitWayfinder { config: WayfinderConfig },
    #[serde(rename = "CLEAR_CACHE")]
    ClearCache,
    #[serde(rename = "CLEAR_VERIFICATION")]
    ClearVerification { identifier: Identifier },
}

/// Replies posted back on the message port after handling a
/// [`ControlMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    WayfinderReady,
    CacheCleared,
    VerificationCleared { identifier: Identifier },
}

/// Parse a raw JSON control message. Unknown or malformed messages are
/// ignored silently — the caller receives `None` rather than
/// an error to propagate.
pub fn parse_control_message(raw: &[u8]) -> Option<ControlMessage> {
    match serde_json::from_slice(raw) {
        Ok(message) => Some(message),
        Err(error) => {
            tracing::trace!(%error, "ignoring malformed control message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clear_cache() {
        let msg = parse_control_message(br#"{"type":"CLEAR_CACHE"}"#).unwrap();
        assert!(matches!(msg, ControlMessage::ClearCache));
    }

    #[test]
    fn parses_clear_verification() {
        let msg = parse_control_message(
            br#"{"type":"CLEAR_VERIFICATION","identifier":"app.example"}"#,
        )
        .unwrap();
        assert!(matches!(msg, ControlMessage::ClearVerification { .. }));
    }

    #[test]
    fn parses_init_wayfinder() {
        let msg = parse_control_message(
            br#"{"type":"INIT_WAYFINDER","config":{"gateway_url":"https://g.example"}}"#,
        )
        .unwrap();
        assert!(matches!(msg, ControlMessage::InitWayfinder { .. }));
    }

    #[test]
    fn unknown_type_is_ignored_silently() {
        assert!(parse_control_message(br#"{"type":"SOMETHING_ELSE"}"#).is_none());
    }

    #[test]
    fn malformed_json_is_ignored_silently() {
        assert!(parse_control_message(b"not json at all").is_none());
    }
}
