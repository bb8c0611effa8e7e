//! Proxy dispatcher — the single public entry point.
//!
//! `VerifierService` owns every other component, constructed at install and
//! dropped at teardown. [`VerifierService::dispatch`] never returns `Err`:
//! every failure path renders a styled error page.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use http::{Response, StatusCode};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache::{CacheConfig, VerifiedCache};
use crate::config::ProxyConfig;
use crate::control::{parse_control_message, ControlMessage, ControlReply};
use crate::error::{DispatchError, VerifyError};
use crate::identifier::Identifier;
use crate::manifest::normalise_path;
use crate::patcher::inject_location_patch;
use crate::state::{VerificationEvent, VerificationStateStore};
use crate::verifier::ManifestVerifier;
use crate::wayfinder::{ReqwestWayfinder, Wayfinder};

const PROXY_PREFIX: &str = "/ar-proxy/";

/// An incoming request, decoupled from any particular HTTP server framework
/// — the browser `fetch` event's request, generalised.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub path: String,
    pub is_navigation: bool,
    pub query: HashMap<String, String>,
}

impl ProxyRequest {
    pub fn download_filename(&self) -> Option<&str> {
        self.query.get("download").map(String::as_str)
    }
}

/// The result of classifying a request: either the worker handles it, or
/// the request passes through to the network unchanged.
pub enum DispatchOutcome {
    Handled(Response<Bytes>),
    PassThrough,
}

type VerifyFuture = Shared<BoxFuture<'static, Result<(), VerifyError>>>;

/// The owned service boundary: one instance per worker lifetime. Holds the
/// verified cache, verification state, pending-verifications dedup table,
/// and abort-controller registry.
pub struct VerifierService {
    state: Arc<VerificationStateStore>,
    cache: Arc<Mutex<VerifiedCache>>,
    verifier: RwLock<Option<Arc<ManifestVerifier>>>,
    config: RwLock<Option<ProxyConfig>>,
    pending: Mutex<HashMap<Identifier, VerifyFuture>>,
    abort_handles: Mutex<HashMap<Identifier, CancellationToken>>,
}

impl VerifierService {
    /// Construct a fresh service with no wayfinder configured yet — the
    /// analogue of the worker's `install` event. The service is usable
    /// immediately but every proxy request waits (bounded) for
    /// `INIT_WAYFINDER` before it can verify anything.
    pub fn new() -> Self {
        Self {
            state: Arc::new(VerificationStateStore::new()),
            cache: Arc::new(Mutex::new(VerifiedCache::new(CacheConfig::default()))),
            verifier: RwLock::new(None),
            config: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
            abort_handles: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to broadcast events, the analogue of a tab becoming a
    /// "controlled client".
    pub fn subscribe(&self) -> broadcast::Receiver<VerificationEvent> {
        self.state.subscribe()
    }

    /// Scope absolute-path interception to `id`. A host calls this when a
    /// tab navigates to a proxied identifier.
    pub async fn set_active(&self, id: Option<Identifier>) {
        self.state.set_active(id).await;
    }

    /// Drop every owned resource. There is no browser `activate`/`claim`
    /// step to reproduce in a library; a host calls this at its own
    /// teardown point.
    pub async fn shutdown(&self) {
        self.cache.lock().await.clear();
        self.abort_handles.lock().await.clear();
        self.pending.lock().await.clear();
    }

    /// Handle a [`ControlMessage`].
    pub async fn handle_control_message(&self, raw: &[u8]) -> Option<ControlReply> {
        match parse_control_message(raw)? {
            ControlMessage::InitWayfinder { config } => {
                self.init_wayfinder(config.clone()).await;
                Some(ControlReply::WayfinderReady)
            }
            ControlMessage::ClearCache => {
                self.cache.lock().await.clear();
                Some(ControlReply::CacheCleared)
            }
            ControlMessage::ClearVerification { identifier } => {
                self.clear_verification(&identifier).await;
                Some(ControlReply::VerificationCleared { identifier })
            }
        }
    }

    async fn init_wayfinder(&self, wf_config: crate::wayfinder::WayfinderConfig) {
        let concurrency = wf_config.concurrency;
        let wayfinder: Arc<dyn Wayfinder> = Arc::new(ReqwestWayfinder::new(wf_config.clone()));
        let verifier = Arc::new(ManifestVerifier::new(
            wayfinder,
            self.state.clone(),
            self.cache.clone(),
        ));
        if let Some(n) = concurrency {
            verifier.set_concurrency(n).await;
        }
        *self.verifier.write().await = Some(verifier);
        *self.config.write().await = Some(ProxyConfig {
            wayfinder: wf_config,
            cache: Default::default(),
            init_timeout_ms: 10_000,
        });
    }

    /// Construct directly from an already-built wayfinder and config — the
    /// path used by tests and by hosts that build their own `Wayfinder`
    /// implementation instead of going through `INIT_WAYFINDER` JSON.
    pub async fn init_with_wayfinder(&self, wayfinder: Arc<dyn Wayfinder>, config: ProxyConfig) {
        let verifier = Arc::new(ManifestVerifier::new(
            wayfinder,
            self.state.clone(),
            self.cache.clone(),
        ));
        if let Some(n) = config.wayfinder.concurrency {
            verifier.set_concurrency(n).await;
        }
        *self.verifier.write().await = Some(verifier);
        *self.config.write().await = Some(config);
    }

    /// `CLEAR_VERIFICATION`: abort in-flight work, drop cached resources for
    /// this manifest, clear state, unset active-identifier if matched.
    async fn clear_verification(&self, id: &Identifier) {
        if let Some(token) = self.abort_handles.lock().await.remove(id) {
            token.cancel();
        }
        self.pending.lock().await.remove(id);

        if let Some(state) = self.state.get_state(id).await {
            if let Some(manifest) = &state.manifest {
                self.cache
                    .lock()
                    .await
                    .clear_for_manifest(manifest.resource_tx_ids());
            }
        }
        self.state.clear(id).await;
    }

    /// The single public entry point: classify the request and dispatch.
    pub async fn dispatch(&self, request: ProxyRequest) -> DispatchOutcome {
        if let Some(rest) = request.path.strip_prefix(PROXY_PREFIX) {
            return DispatchOutcome::Handled(self.handle_proxy_prefix(rest, &request).await);
        }

        if request.is_navigation {
            return DispatchOutcome::PassThrough;
        }

        if let Some((identifier, _tx_id)) = self.state.tx_id_for_active_path(&request.path).await {
            return DispatchOutcome::Handled(
                self.serve_resource(&identifier, &request.path, request.download_filename())
                    .await
                    .unwrap_or_else(|e| error_page(&e)),
            );
        }

        DispatchOutcome::PassThrough
    }

    async fn handle_proxy_prefix(&self, rest: &str, request: &ProxyRequest) -> Response<Bytes> {
        let (identifier_raw, resource_path) = match rest.split_once('/') {
            Some((id, path)) => (id, path),
            None => (rest, ""),
        };

        if identifier_raw.is_empty() {
            return error_page(&DispatchError::MissingIdentifier);
        }

        let identifier = match Identifier::parse(identifier_raw) {
            Ok(id) => id,
            Err(e) => return error_page(&DispatchError::Verify(e)),
        };

        if let Err(e) = self.wait_for_wayfinder().await {
            return error_page(&e);
        }

        if let Err(e) = self.ensure_verified(&identifier).await {
            // verify_identifier already broadcasts Failed or Cancelled for
            // its own errors; NotInitialised is the only case reaching here
            // without a prior broadcast, and it has nothing to announce.
            return error_page(&DispatchError::Verify(e));
        }

        self.serve_resource(&identifier, resource_path, request.download_filename())
            .await
            .unwrap_or_else(|e| error_page(&e))
    }

    async fn wait_for_wayfinder(&self) -> Result<(), DispatchError> {
        if self.verifier.read().await.is_some() {
            return Ok(());
        }

        let timeout = self
            .config
            .read()
            .await
            .as_ref()
            .map(|c| c.init_timeout())
            .unwrap_or(std::time::Duration::from_secs(10));
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            if self.verifier.read().await.is_some() {
                return Ok(());
            }
            sleep(std::time::Duration::from_millis(50)).await;
        }

        Err(DispatchError::InitialisationTimeout)
    }

    /// Ensure `id` is manifest-verified, driving or joining verification as
    /// needed. At most one pending verification runs per identifier.
    async fn ensure_verified(&self, id: &Identifier) -> Result<(), VerifyError> {
        if self.state.is_ready(id).await {
            return Ok(());
        }

        let existing = self.pending.lock().await.get(id).cloned();
        let future = match existing {
            Some(f) => f,
            None => {
                let verifier = self
                    .verifier
                    .read()
                    .await
                    .clone()
                    .ok_or(VerifyError::NotInitialised)?;
                let token = CancellationToken::new();
                self.abort_handles.lock().await.insert(id.clone(), token.clone());

                let verifier = verifier.clone();
                let id_owned = id.clone();
                let fut: BoxFuture<'static, Result<(), VerifyError>> = async move {
                    verifier.verify_identifier(&id_owned, token).await
                }
                .boxed();
                let shared = fut.shared();

                self.pending.lock().await.insert(id.clone(), shared.clone());
                shared
            }
        };

        let result = future.await;
        self.pending.lock().await.remove(id);
        self.abort_handles.lock().await.remove(id);
        result
    }

    /// Normalise path, resolve, serve cached bytes (HTML-patched unless a
    /// download was requested), or verify on demand on a cache miss.
    async fn serve_resource(
        &self,
        id: &Identifier,
        path: &str,
        download_filename: Option<&str>,
    ) -> Result<Response<Bytes>, DispatchError> {
        let verifier = self
            .verifier
            .read()
            .await
            .clone()
            .ok_or(VerifyError::NotInitialised)?;

        let gateway_host = verifier.gateway_host();

        let normalised = normalise_path(path);
        let identifier_owned = id.clone();
        let transform: Option<Box<dyn Fn(&[u8]) -> Vec<u8>>> = if download_filename.is_none() {
            let id_for_closure = identifier_owned.clone();
            Some(Box::new(move |bytes: &[u8]| {
                let html = String::from_utf8_lossy(bytes);
                inject_location_patch(&html, id_for_closure.as_str(), &gateway_host).into_bytes()
            }))
        } else {
            None
        };

        let transform_ref = transform.as_ref().map(|b| b.as_ref() as &dyn Fn(&[u8]) -> Vec<u8>);

        match verifier
            .get_verified_content(id, &normalised, transform_ref, download_filename)
            .await
        {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(DispatchError::Verify(VerifyError::NotInManifest(
                not_found_message(id, &normalised, &self.state).await,
            ))),
            Err(e) => Err(DispatchError::Verify(e)),
        }
    }
}

impl Default for VerifierService {
    fn default() -> Self {
        Self::new()
    }
}

async fn not_found_message(
    id: &Identifier,
    path: &str,
    state: &VerificationStateStore,
) -> String {
    let available = state
        .get_state(id)
        .await
        .and_then(|s| s.manifest.map(|m| m.sample_paths(10)))
        .unwrap_or_default();
    if available.is_empty() {
        path.to_string()
    } else {
        format!("{path} (available: {})", available.join(", "))
    }
}

/// Render the styled error page. All dynamic substitutions are
/// HTML-escaped.
fn error_page(error: &DispatchError) -> Response<Bytes> {
    warn!(error = %error, "rendering styled error page");
    let status = error.status_code();
    let title = error.title();
    let message = error.to_string();

    let body = format!(
        r#"<!doctype html>
<html><head><meta charset="utf-8"><title>{title}</title>
<style>
body {{ font-family: -apple-system, sans-serif; background:#0b0d10; color:#e6e6e6;
       display:flex; align-items:center; justify-content:center; height:100vh; margin:0; }}
.card {{ max-width:480px; padding:2rem; border-radius:12px; background:#15181d; }}
h1 {{ font-size:1.25rem; margin:0 0 0.5rem; }}
p {{ color:#9aa0a6; line-height:1.5; }}
</style></head>
<body><div class="card"><h1>{title}</h1><p>{message}</p></div></body></html>"#,
        title = escape_html(title),
        message = escape_html(&message),
    );

    Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header("content-type", "text/html; charset=utf-8")
        .body(Bytes::from(body))
        .expect("well-formed error response")
}

/// HTML-escape the five reserved characters.
fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
