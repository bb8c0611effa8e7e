//! Manifest verifier — the manifest-verification and on-demand
//! resource-verification algorithms, bounded-concurrency resource
//! verification, and on-demand lookup with optional HTML transform.

use std::sync::Arc;

use bytes::Bytes;
use http::Response;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::VerifiedCache;
use crate::error::VerifyError;
use crate::identifier::Identifier;
use crate::manifest::{self, Manifest, MAX_RESOURCE_BYTES};
use crate::state::{VerificationEvent, VerificationStateStore};
use crate::wayfinder::Wayfinder;

const DEFAULT_CONCURRENCY: usize = 4;

pub struct ManifestVerifier {
    wayfinder: Arc<dyn Wayfinder>,
    state: Arc<VerificationStateStore>,
    cache: Arc<Mutex<VerifiedCache>>,
    concurrency: Arc<Mutex<Arc<Semaphore>>>,
}

impl ManifestVerifier {
    pub fn new(
        wayfinder: Arc<dyn Wayfinder>,
        state: Arc<VerificationStateStore>,
        cache: Arc<Mutex<VerifiedCache>>,
    ) -> Self {
        Self {
            wayfinder,
            state,
            cache,
            concurrency: Arc::new(Mutex::new(Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)))),
        }
    }

    /// Adjust the maximum parallel per-resource verifications. Used for
    /// warm-up scenarios only.
    pub async fn set_concurrency(&self, n: usize) {
        *self.concurrency.lock().await = Arc::new(Semaphore::new(n.max(1)));
    }

    /// Hostname of the gateway currently in use, for the location patcher's
    /// injected context object.
    pub fn gateway_host(&self) -> String {
        self.wayfinder.gateway_host()
    }

    /// Drive the full manifest-verified handshake: resolve, fetch, parse,
    /// verify the index resource, then transition state.
    pub async fn verify_identifier(
        &self,
        id: &Identifier,
        cancel: CancellationToken,
    ) -> Result<(), VerifyError> {
        self.state.begin_verifying(id).await;
        self.state.broadcast(VerificationEvent::Started {
            identifier: id.clone(),
        });

        let result = self.verify_identifier_inner(id, &cancel).await;

        match &result {
            Ok(()) => {}
            Err(VerifyError::Cancelled(_)) => {
                // Cancellation leaves state cleared, not failed, so the next
                // request restarts fresh.
                self.state.clear(id).await;
                self.state.broadcast(VerificationEvent::Cancelled {
                    identifier: id.clone(),
                });
            }
            Err(e) => {
                self.state.mark_failed(id, e.to_string()).await;
                self.state.broadcast(VerificationEvent::Failed {
                    identifier: id.clone(),
                    error: e.to_string(),
                });
            }
        }

        result
    }

    async fn verify_identifier_inner(
        &self,
        id: &Identifier,
        cancel: &CancellationToken,
    ) -> Result<(), VerifyError> {
        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled(id.clone()));
        }

        // Resolve a name to a manifest txId, or treat the
        // identifier itself as the manifest txId.
        let manifest_tx_id = if id.is_tx_id() {
            crate::identifier::TxId::parse(id.as_str())?
        } else {
            let resolved = tokio::select! {
                r = self.wayfinder.resolve_name(id.as_str()) => r,
                _ = cancel.cancelled() => return Err(VerifyError::Cancelled(id.clone())),
            };
            resolved.map_err(|source| VerifyError::Network {
                identifier: id.clone(),
                reason: source.to_string(),
            })?
        };

        // Fetch manifest bytes through the wayfinder with
        // verification enabled.
        let manifest_bytes = tokio::select! {
            r = self.wayfinder.fetch(&manifest_tx_id, cancel) => r,
            _ = cancel.cancelled() => return Err(VerifyError::Cancelled(id.clone())),
        }
        .map_err(|source| VerifyError::Integrity {
            identifier: id.clone(),
            reason: source.to_string(),
        })?;

        // Parse into {indexPath, pathToTxId, fallback?}.
        let manifest = Manifest::parse(&manifest_bytes.bytes, manifest_tx_id)?;

        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled(id.clone()));
        }

        // Eagerly verify the index resource.
        let index_tx_id = manifest.resolve(&manifest.index_path)?.clone();
        let index_resource = tokio::select! {
            r = self.wayfinder.fetch(&index_tx_id, cancel) => r,
            _ = cancel.cancelled() => return Err(VerifyError::Cancelled(id.clone())),
        }
        .map_err(|source| VerifyError::Integrity {
            identifier: id.clone(),
            reason: source.to_string(),
        })?;

        if index_resource.bytes.len() as u64 > MAX_RESOURCE_BYTES {
            return Err(VerifyError::TooLarge {
                kind: "resource",
                actual: index_resource.bytes.len() as u64,
                limit: MAX_RESOURCE_BYTES,
            });
        }

        self.cache.lock().await.put(
            index_tx_id.clone(),
            index_resource.bytes,
            index_resource.content_type,
        );

        // Transition to manifest-verified, broadcast events.
        let resource_count = manifest.path_to_tx_id.len();
        let manifest_tx_id = manifest.manifest_tx_id.clone();
        let index_path = manifest.index_path.clone();
        self.state
            .mark_manifest_verified(id, manifest, index_tx_id.clone())
            .await;
        self.state.broadcast(VerificationEvent::ManifestVerified {
            identifier: id.clone(),
            manifest_tx_id,
            resource_count,
        });
        self.state.broadcast(VerificationEvent::ResourceVerified {
            identifier: id.clone(),
            path: index_path,
            tx_id: index_tx_id,
        });

        info!(identifier = %id, "manifest verified");
        Ok(())
    }

    /// Verify one non-index resource on demand.
    pub async fn verify_resource_on_demand(
        &self,
        id: &Identifier,
        normalised_path: &str,
    ) -> Result<bool, VerifyError> {
        if !self.state.is_ready(id).await {
            return Err(VerifyError::NotInitialised);
        }

        let tx_id = {
            let state = self
                .state
                .get_state(id)
                .await
                .ok_or(VerifyError::NotInitialised)?;
            let manifest = state.manifest.as_ref().ok_or(VerifyError::NotInitialised)?;
            manifest.resolve(normalised_path)?.clone()
        };

        if self.cache.lock().await.has(&tx_id) {
            return Ok(true);
        }

        let permit_holder = self.concurrency.lock().await.clone();
        let _permit = permit_holder
            .acquire_owned()
            .await
            .expect("semaphore never closed");

        // Re-check after acquiring the permit: a concurrent caller for the
        // same path may have finished while we waited.
        if self.cache.lock().await.has(&tx_id) {
            return Ok(true);
        }

        let cancel = CancellationToken::new();
        let resource = self
            .wayfinder
            .fetch(&tx_id, &cancel)
            .await
            .map_err(|source| VerifyError::Integrity {
                identifier: id.clone(),
                reason: source.to_string(),
            })?;

        if resource.bytes.len() as u64 > MAX_RESOURCE_BYTES {
            return Err(VerifyError::TooLarge {
                kind: "resource",
                actual: resource.bytes.len() as u64,
                limit: MAX_RESOURCE_BYTES,
            });
        }

        self.cache
            .lock()
            .await
            .put(tx_id.clone(), resource.bytes, resource.content_type);
        self.state.mark_resource_verified(id, tx_id.clone()).await;
        self.state.broadcast(VerificationEvent::ResourceVerified {
            identifier: id.clone(),
            path: normalised_path.to_string(),
            tx_id,
        });

        Ok(true)
    }

    /// Lookup + optional HTML transform.
    pub async fn get_verified_content(
        &self,
        id: &Identifier,
        path: &str,
        html_transform: Option<&dyn Fn(&[u8]) -> Vec<u8>>,
        download_filename: Option<&str>,
    ) -> Result<Option<Response<Bytes>>, VerifyError> {
        let normalised = manifest::normalise_path(path);

        let tx_id = {
            let state = match self.state.get_state(id).await {
                Some(s) => s,
                None => return Ok(None),
            };
            let manifest = match &state.manifest {
                Some(m) => m,
                None => return Ok(None),
            };
            match manifest.resolve(&normalised) {
                Ok(tx) => tx.clone(),
                Err(VerifyError::NotInManifest(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        };

        let entry = match self.cache.lock().await.get(&tx_id) {
            Some(e) => e,
            None => {
                self.verify_resource_on_demand(id, &normalised).await?;
                match self.cache.lock().await.get(&tx_id) {
                    Some(e) => e,
                    None => {
                        warn!(identifier = %id, path = %normalised, "verified but cache missed");
                        return Ok(None);
                    }
                }
            }
        };

        if let (Some(transform), true) = (html_transform, is_html(&entry.content_type)) {
            let transformed = transform(&entry.bytes);
            let patched = crate::cache::CacheEntry {
                bytes: Bytes::from(transformed),
                content_type: entry.content_type.clone(),
            };
            Ok(Some(crate::cache::VerifiedCache::to_response(
                &patched,
                download_filename,
            )))
        } else {
            Ok(Some(crate::cache::VerifiedCache::to_response(
                &entry,
                download_filename,
            )))
        }
    }
}

fn is_html(content_type: &str) -> bool {
    content_type.starts_with("text/html")
}
