//! The verified-bytes cache.
//!
//! An in-memory map from resource transaction id to its verified bytes and
//! content type. Backed by [`lru::LruCache`] for count-based eviction, with
//! an additional running byte-size budget layered on top.

use std::num::NonZeroUsize;

use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode};
use lru::LruCache;

use crate::identifier::TxId;

/// Eviction thresholds.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 200,
            max_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub bytes: Bytes,
    pub content_type: String,
}

pub struct VerifiedCache {
    config: CacheConfig,
    entries: LruCache<TxId, CacheEntry>,
    total_bytes: u64,
}

impl VerifiedCache {
    pub fn new(config: CacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_entries.max(1)).unwrap();
        Self {
            config,
            entries: LruCache::new(cap),
            total_bytes: 0,
        }
    }

    /// Insert or overwrite a verified entry. Inserts for the same txId are
    /// idempotent and byte-identical by contract, so repeated puts never
    /// grow `total_bytes` unboundedly.
    pub fn put(&mut self, tx_id: TxId, bytes: Bytes, content_type: String) {
        let size = bytes.len() as u64;

        if let Some(old) = self.entries.peek(&tx_id) {
            self.total_bytes = self.total_bytes.saturating_sub(old.bytes.len() as u64);
        }

        self.entries.put(
            tx_id,
            CacheEntry {
                bytes,
                content_type,
            },
        );
        self.total_bytes = self.total_bytes.saturating_add(size);

        while self.total_bytes > self.config.max_bytes {
            match self.entries.pop_lru() {
                Some((_, evicted)) => {
                    self.total_bytes = self.total_bytes.saturating_sub(evicted.bytes.len() as u64)
                }
                None => break,
            }
        }
    }

    /// Existence check that does not promote the entry in the LRU order.
    pub fn has(&self, tx_id: &TxId) -> bool {
        self.entries.contains(tx_id)
    }

    /// Fetch a verified entry, promoting it to most-recently-used.
    pub fn get(&mut self, tx_id: &TxId) -> Option<CacheEntry> {
        self.entries.get(tx_id).cloned()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    /// Remove every resource txId belonging to a cleared manifest.
    pub fn clear_for_manifest<'a>(&mut self, tx_ids: impl Iterator<Item = &'a TxId>) {
        for tx_id in tx_ids {
            if let Some(removed) = self.entries.pop(tx_id) {
                self.total_bytes = self.total_bytes.saturating_sub(removed.bytes.len() as u64);
            }
        }
    }

    /// Build the HTTP response for a cached entry. `download_filename`, when
    /// present, adds a sanitised `Content-Disposition: attachment` header.
    pub fn to_response(
        entry: &CacheEntry,
        download_filename: Option<&str>,
    ) -> Response<Bytes> {
        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header("content-type", entry.content_type.clone());

        if let Some(name) = download_filename {
            if let Ok(value) = HeaderValue::from_str(&content_disposition(name)) {
                builder = builder.header("content-disposition", value);
            }
        }

        builder.body(entry.bytes.clone()).expect("well-formed response")
    }
}

/// Build a `Content-Disposition: attachment` header value, sanitising the
/// filename: control characters and CR/LF are stripped. The quoted
/// `filename=` parameter is ASCII-only per RFC 6266/5987 — non-ASCII
/// characters are replaced with `_` there — with the full name additionally
/// carried, percent-encoded, in `filename*=UTF-8''…` for clients that
/// understand it.
fn content_disposition(filename: &str) -> String {
    let sanitised: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .collect();

    let ascii_fallback: String = sanitised
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    let ascii_fallback = ascii_fallback.replace('"', "'");

    if sanitised.is_ascii() {
        format!("attachment; filename=\"{ascii_fallback}\"")
    } else {
        let encoded = percent_encode_rfc5987(&sanitised);
        format!("attachment; filename=\"{ascii_fallback}\"; filename*=UTF-8''{encoded}")
    }
}

fn percent_encode_rfc5987(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for byte in s.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(*byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
