//! A content-verifying proxy for permanent-storage-backed web apps.
//!
//! This crate is the portable core of a browser service worker that sits in
//! front of `fetch`: requests under `/ar-proxy/{identifier}/...` are resolved
//! against a signed, content-addressed manifest, every resource byte is
//! verified through a [`wayfinder::Wayfinder`] before it is ever served, and
//! only verified bytes are cached and returned. Nothing reaches a page that
//! hasn't passed verification.
//!
//! # Architecture
//!
//! - [`identifier`] — parsing and validation for the two identifier shapes
//!   (content-hash transaction ids and human names) before any I/O.
//! - [`manifest`] — the manifest wire format and path resolution precedence.
//! - [`cache`] — the in-memory verified-bytes cache (count + byte budget).
//! - [`state`] — per-identifier verification lifecycle and broadcast events.
//! - [`wayfinder`] — the trusted resolve/fetch/verify collaborator.
//! - [`verifier`] — the manifest and on-demand resource verification
//!   algorithms, bounded by a concurrency semaphore.
//! - [`patcher`] — safe HTML location-rewriting for proxied apps.
//! - [`control`] — the `INIT_WAYFINDER` / `CLEAR_CACHE` / `CLEAR_VERIFICATION`
//!   lifecycle messages.
//! - [`dispatcher`] — [`VerifierService`], the single entry point tying
//!   every other module together.
//!
//! A host process owns one [`VerifierService`] for its lifetime, feeding it
//! requests via [`VerifierService::dispatch`] and control messages via
//! [`VerifierService::handle_control_message`]. There is no global state —
//! everything lives on the service instance, so a host can run more than one
//! independently (e.g. one per worker thread in a test harness).

pub mod cache;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod identifier;
pub mod manifest;
pub mod patcher;
pub mod state;
pub mod verifier;
pub mod wayfinder;

#[cfg(test)]
pub(crate) mod test_support;

pub use dispatcher::{DispatchOutcome, ProxyRequest, VerifierService};
pub use error::{DispatchError, VerifyError};
pub use identifier::{Identifier, TxId};
