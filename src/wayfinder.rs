//! The wayfinder collaborator: resolves names, fetches bytes, and enforces
//! integrity. The verifier never speaks to a gateway directly; it only ever
//! goes through this trait, which stands in for a trusted external library.

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::identifier::TxId;

/// A fetched, wayfinder-verified resource.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Configuration supplied with `INIT_WAYFINDER`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WayfinderConfig {
    /// Base gateway URL used to resolve transaction ids and names.
    pub gateway_url: String,
    /// Per-resource verification concurrency override.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

/// The trusted library that resolves names, fetches bytes, and enforces
/// integrity. Integrity failures are surfaced as `Err`; this trait never
/// returns unverified bytes as `Ok`.
#[async_trait]
pub trait Wayfinder: Send + Sync {
    /// Resolve a human name to the manifest transaction id it currently
    /// points at.
    async fn resolve_name(&self, name: &str) -> anyhow::Result<TxId>;

    /// Fetch and verify the bytes at `tx_id`, honouring `cancel` for
    /// cooperative cancellation. Returns an error if the signature/hash
    /// check fails — callers must never retain bytes from an `Err` result.
    async fn fetch(
        &self,
        tx_id: &TxId,
        cancel: &CancellationToken,
    ) -> anyhow::Result<FetchedResource>;

    /// Hostname of the gateway currently in use, for the location patcher's
    /// injected context object.
    fn gateway_host(&self) -> String;
}

/// Production wayfinder backed by `reqwest`, talking to the configured
/// gateway. Verification strategy (signature vs content-hash ladder) is the
/// gateway's concern — this client trusts the gateway's status contract and
/// treats any non-2xx response as an integrity failure.
pub struct ReqwestWayfinder {
    client: reqwest::Client,
    config: WayfinderConfig,
}

impl ReqwestWayfinder {
    pub fn new(config: WayfinderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Wayfinder for ReqwestWayfinder {
    async fn resolve_name(&self, name: &str) -> anyhow::Result<TxId> {
        let url = format!("{}/resolve/{name}", self.config.gateway_url);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let body: ResolveResponse = resp.json().await?;
        Ok(TxId::parse(&body.manifest_tx_id)?)
    }

    async fn fetch(
        &self,
        tx_id: &TxId,
        cancel: &CancellationToken,
    ) -> anyhow::Result<FetchedResource> {
        let url = format!("{}/raw/{}", self.config.gateway_url, tx_id.as_str());

        let response = tokio::select! {
            result = self.client.get(&url).send() => result?.error_for_status()?,
            _ = cancel.cancelled() => anyhow::bail!("fetch cancelled for {tx_id}"),
        };

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = tokio::select! {
            result = response.bytes() => result?,
            _ = cancel.cancelled() => anyhow::bail!("fetch cancelled for {tx_id}"),
        };

        Ok(FetchedResource { bytes, content_type })
    }

    fn gateway_host(&self) -> String {
        url::Url::parse(&self.config.gateway_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.config.gateway_url.clone())
    }
}

#[derive(Debug, serde::Deserialize)]
struct ResolveResponse {
    #[serde(rename = "manifestTxId")]
    manifest_tx_id: String,
}
