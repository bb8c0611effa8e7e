//! Typed error surfaces for the verifier.
//!
//! Every fallible path in the crate returns one of these instead of a
//! stringly-typed error or a panic — the dispatcher (`dispatcher.rs`) maps
//! them onto styled HTML error pages, never onto a thrown exception.

use thiserror::Error;

use crate::identifier::Identifier;

/// Failures that can occur while verifying a manifest or a resource under it.
#[derive(Debug, Error, Clone)]
pub enum VerifyError {
    /// The identifier contains characters outside the allowed set.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The manifest or resource body failed signature/hash verification.
    #[error("integrity check failed for {identifier}: {reason}")]
    Integrity {
        identifier: Identifier,
        reason: String,
    },

    /// The manifest bytes did not parse as the expected JSON shape.
    #[error("malformed manifest for {0}")]
    MalformedManifest(Identifier),

    /// `path` has no entry in the manifest and no `__fallback__` is declared.
    #[error("path not in manifest: {0}")]
    NotInManifest(String),

    /// Manifest or resource exceeded the configured size bound.
    #[error("{kind} exceeds size bound ({actual} > {limit} bytes)")]
    TooLarge {
        kind: &'static str,
        actual: u64,
        limit: u64,
    },

    /// The wayfinder library itself returned an error (DNS, gateway, etc).
    #[error("network error resolving {identifier}: {reason}")]
    Network {
        identifier: Identifier,
        reason: String,
    },

    /// Verification was aborted via `CLEAR_VERIFICATION` or a dropped caller.
    #[error("verification of {0} was cancelled")]
    Cancelled(Identifier),

    /// The wayfinder has not been initialised with `INIT_WAYFINDER` yet.
    #[error("wayfinder not initialised")]
    NotInitialised,
}

impl VerifyError {
    /// Whether this failure should mark the identifier's state as `failed`
    /// (integrity/malformed/invalid) as opposed to merely clearing it
    /// (`Cancelled`) or leaving it retryable (`Network`, `NotInitialised`).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VerifyError::Integrity { .. }
                | VerifyError::MalformedManifest(_)
                | VerifyError::InvalidIdentifier(_)
                | VerifyError::TooLarge { .. }
        )
    }
}

/// Failures surfaced by the dispatcher before or outside manifest
/// verification proper (missing identifier, timeouts, invariant violations).
#[derive(Debug, Error, Clone)]
pub enum DispatchError {
    #[error("missing identifier")]
    MissingIdentifier,

    #[error("verification not ready: wayfinder initialisation timed out")]
    InitialisationTimeout,

    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// A resource reported verified but the cache lookup missed. Must be
    /// impossible; fails closed rather than serving unverified bytes.
    #[error("internal invariant violation: {0} reported verified but cache missed")]
    InvariantViolation(String),
}

impl DispatchError {
    /// HTTP status code for the styled error page.
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::MissingIdentifier => 400,
            DispatchError::Verify(VerifyError::InvalidIdentifier(_)) => 400,
            _ => 500,
        }
    }

    /// Short title for the styled error page.
    pub fn title(&self) -> &'static str {
        match self {
            DispatchError::MissingIdentifier => "Missing Identifier",
            DispatchError::InitialisationTimeout => "Verification Not Ready",
            DispatchError::Verify(VerifyError::Integrity { .. }) => "Verification Failed",
            DispatchError::Verify(VerifyError::MalformedManifest(_)) => "Verification Failed",
            DispatchError::Verify(VerifyError::NotInManifest(_)) => "Not Found",
            DispatchError::Verify(VerifyError::InvalidIdentifier(_)) => "Invalid Identifier",
            DispatchError::Verify(VerifyError::Cancelled(_)) => "Verification Cancelled",
            DispatchError::Verify(VerifyError::Network { .. }) => "Verification Failed",
            DispatchError::Verify(VerifyError::NotInitialised) => "Verification Not Ready",
            DispatchError::Verify(VerifyError::TooLarge { .. }) => "Verification Failed",
            DispatchError::InvariantViolation(_) => "Internal Error",
        }
    }
}
