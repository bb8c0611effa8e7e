//! In-memory wayfinder test double, used by this crate's own unit tests.
//! Mirrors the shape of `ReqwestWayfinder` without any network I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::identifier::TxId;
use crate::wayfinder::{FetchedResource, Wayfinder};

fn tx(c: char) -> TxId {
    TxId::parse(&c.to_string().repeat(43)).unwrap()
}

pub struct MockWayfinder {
    manifest_tx_id: TxId,
    resources: Mutex<HashMap<TxId, FetchedResource>>,
    names: HashMap<String, TxId>,
    fail_tx_ids: Mutex<Vec<TxId>>,
    fetch_count: Arc<AtomicUsize>,
}

impl MockWayfinder {
    /// A working site: manifest at `a..a`, index at `b..b`, one sub-resource
    /// `assets/app.js` at `c..c`, all bytes verifying successfully.
    pub fn with_default_site() -> Self {
        let manifest_tx_id = tx('a');
        let index_tx_id = tx('b');
        let app_js_tx_id = tx('c');

        let manifest_json = format!(
            r#"{{"index":{{"path":"index.html"}},"paths":{{"index.html":{{"id":"{}"}},"assets/app.js":{{"id":"{}"}}}}}}"#,
            index_tx_id.as_str(),
            app_js_tx_id.as_str()
        );

        let mut resources = HashMap::new();
        resources.insert(
            manifest_tx_id.clone(),
            FetchedResource {
                bytes: Bytes::from(manifest_json),
                content_type: "application/json".into(),
            },
        );
        resources.insert(
            index_tx_id.clone(),
            FetchedResource {
                bytes: Bytes::from_static(b"<html><head></head><body>hi</body></html>"),
                content_type: "text/html".into(),
            },
        );
        resources.insert(
            app_js_tx_id,
            FetchedResource {
                bytes: Bytes::from_static(b"console.log('hi')"),
                content_type: "application/javascript".into(),
            },
        );

        Self {
            manifest_tx_id,
            resources: Mutex::new(resources),
            names: HashMap::new(),
            fail_tx_ids: Mutex::new(Vec::new()),
            fetch_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A manifest transaction id whose bytes never parse (integrity
    /// failure), for end-to-end integrity-failure tests.
    pub fn failing_manifest() -> Self {
        let manifest_tx_id = tx('e');
        let mut resources = HashMap::new();
        resources.insert(
            manifest_tx_id.clone(),
            FetchedResource {
                bytes: Bytes::from_static(b"not a manifest"),
                content_type: "application/json".into(),
            },
        );
        Self {
            manifest_tx_id,
            resources: Mutex::new(resources),
            names: HashMap::new(),
            fail_tx_ids: Mutex::new(Vec::new()),
            fetch_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn manifest_tx_id(&self) -> TxId {
        self.manifest_tx_id.clone()
    }

    pub fn fetch_count_handle(&self) -> impl Fn() -> usize {
        let counter = self.fetch_count.clone();
        move || counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Wayfinder for MockWayfinder {
    async fn resolve_name(&self, name: &str) -> anyhow::Result<TxId> {
        self.names
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such name: {name}"))
    }

    async fn fetch(
        &self,
        tx_id: &TxId,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<FetchedResource> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_tx_ids.lock().unwrap().contains(tx_id) {
            anyhow::bail!("integrity check failed for {tx_id}");
        }
        self.resources
            .lock()
            .unwrap()
            .get(tx_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such resource: {tx_id}"))
    }

    fn gateway_host(&self) -> String {
        "gateway.test".to_string()
    }
}
