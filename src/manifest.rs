//! Manifest wire format and path resolution.
//!
//! A manifest is a trusted path→txId table plus metadata. The wire format is
//! tolerant of unknown fields: anything beyond `index`, `paths`, and
//! `fallback` is ignored, never rejected.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::VerifyError;
use crate::identifier::TxId;

/// Reserved key carrying the fallback txId for client-side-routed apps.
pub const FALLBACK_KEY: &str = "__fallback__";

/// Default manifest size bound.
pub const MAX_MANIFEST_BYTES: u64 = 16 * 1024 * 1024;

/// Default single-resource size bound.
pub const MAX_RESOURCE_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct WirePathEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireIndex {
    path: String,
}

/// Raw wire shape. `#[serde(default)]`/optional fields and the absence of
/// `deny_unknown_fields` mean any additional top-level keys the source
/// happens to carry are silently ignored rather than rejected.
#[derive(Debug, Deserialize)]
struct ManifestWire {
    index: WireIndex,
    paths: HashMap<String, WirePathEntry>,
    fallback: Option<WirePathEntry>,
}

/// A parsed, trusted manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// The content hash of the manifest itself.
    pub manifest_tx_id: TxId,
    /// The default path served for the root or a directory request.
    pub index_path: String,
    /// Normalised path → resource txId, including `__fallback__` if present.
    pub path_to_tx_id: HashMap<String, TxId>,
}

impl Manifest {
    /// Parse manifest bytes, validating every declared txId eagerly so a
    /// malformed entry fails manifest verification rather than surfacing
    /// later as a confusing per-resource failure.
    pub fn parse(bytes: &[u8], manifest_tx_id: TxId) -> Result<Self, VerifyError> {
        if bytes.len() as u64 > MAX_MANIFEST_BYTES {
            return Err(VerifyError::TooLarge {
                kind: "manifest",
                actual: bytes.len() as u64,
                limit: MAX_MANIFEST_BYTES,
            });
        }

        let wire: ManifestWire = serde_json::from_slice(bytes)
            .map_err(|_| VerifyError::MalformedManifest(manifest_tx_id.as_str().into()))?;

        let mut path_to_tx_id = HashMap::with_capacity(wire.paths.len() + 1);
        for (path, entry) in wire.paths {
            let tx_id = TxId::parse(&entry.id)
                .map_err(|_| VerifyError::MalformedManifest(manifest_tx_id.as_str().into()))?;
            path_to_tx_id.insert(normalise_path(&path), tx_id);
        }

        if let Some(fallback) = wire.fallback {
            let tx_id = TxId::parse(&fallback.id)
                .map_err(|_| VerifyError::MalformedManifest(manifest_tx_id.as_str().into()))?;
            path_to_tx_id.insert(FALLBACK_KEY.to_string(), tx_id);
        }

        Ok(Manifest {
            manifest_tx_id,
            index_path: wire.index.path,
            path_to_tx_id,
        })
    }

    /// Resolve a request path to a resource txId, following precedence:
    /// exact match, then directory (trailing `/` gets `indexPath` appended),
    /// then `__fallback__`, else not-in-manifest.
    pub fn resolve(&self, path: &str) -> Result<&TxId, VerifyError> {
        let normalised = normalise_path(path);

        if let Some(tx_id) = self.path_to_tx_id.get(&normalised) {
            return Ok(tx_id);
        }

        if normalised.is_empty() || normalised.ends_with('/') {
            let with_index = format!("{normalised}{}", self.index_path);
            if let Some(tx_id) = self.path_to_tx_id.get(&with_index) {
                return Ok(tx_id);
            }
        }

        if let Some(tx_id) = self.path_to_tx_id.get(FALLBACK_KEY) {
            return Ok(tx_id);
        }

        Err(VerifyError::NotInManifest(path.to_string()))
    }

    /// Up to 10 declared paths, for the "not found" error page listing.
    pub fn sample_paths(&self, limit: usize) -> Vec<String> {
        let mut paths: Vec<String> = self
            .path_to_tx_id
            .keys()
            .filter(|p| p.as_str() != FALLBACK_KEY)
            .cloned()
            .collect();
        paths.sort();
        paths.truncate(limit);
        paths
    }

    pub fn resource_tx_ids(&self) -> impl Iterator<Item = &TxId> {
        self.path_to_tx_id.values()
    }
}

/// Normalise a request path: strip a single leading `/`, collapse `//`,
/// never follow `..`, byte-exact comparison.
///
/// `..` segments are dropped rather than resolved — they can never
/// reference a parent, since the manifest's path space has no parent to
/// escape to.
pub fn normalise_path(path: &str) -> String {
    let trailing_slash = path.ends_with('/') && path.len() > 1;
    let stripped = path.strip_prefix('/').unwrap_or(path);

    let mut segments: Vec<&str> = Vec::new();
    for segment in stripped.split('/') {
        if segment.is_empty() || segment == ".." || segment == "." {
            continue;
        }
        segments.push(segment);
    }

    let mut normalised = segments.join("/");
    if trailing_slash && !normalised.is_empty() {
        normalised.push('/');
    }
    normalised
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> Manifest {
        let bytes = br#"{
            "index": {"path": "index.html"},
            "paths": {
                "index.html": {"id": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"},
                "assets/app.js": {"id": "ccccccccccccccccccccccccccccccccccccccccccc"}
            },
            "fallback": {"id": "ddddddddddddddddddddddddddddddddddddddddddd"}
        }"#;
        Manifest::parse(bytes, TxId::parse(&"a".repeat(43)).unwrap()).unwrap()
    }

    #[test]
    fn resolves_exact_path() {
        let m = sample_manifest();
        assert_eq!(m.resolve("assets/app.js").unwrap().as_str(), "c".repeat(43));
    }

    #[test]
    fn resolves_root_to_index() {
        let m = sample_manifest();
        assert_eq!(m.resolve("/").unwrap().as_str(), "b".repeat(43));
        assert_eq!(m.resolve("").unwrap().as_str(), "b".repeat(43));
    }

    #[test]
    fn resolves_directory_trailing_slash_to_index() {
        let m = sample_manifest();
        // no entry for "sub/" itself, so falls through to fallback
        assert_eq!(m.resolve("sub/").unwrap().as_str(), "d".repeat(43));
    }

    #[test]
    fn unknown_path_falls_back() {
        let m = sample_manifest();
        assert_eq!(m.resolve("spa/route").unwrap().as_str(), "d".repeat(43));
    }

    #[test]
    fn no_fallback_means_not_found() {
        let bytes = br#"{"index": {"path": "index.html"}, "paths": {}}"#;
        let m = Manifest::parse(bytes, TxId::parse(&"a".repeat(43)).unwrap()).unwrap();
        assert!(matches!(
            m.resolve("missing"),
            Err(VerifyError::NotInManifest(_))
        ));
    }

    #[test]
    fn tolerates_unknown_fields() {
        let bytes = br#"{
            "index": {"path": "index.html"},
            "paths": {"index.html": {"id": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"}},
            "future_feature": {"anything": true}
        }"#;
        assert!(Manifest::parse(bytes, TxId::parse(&"a".repeat(43)).unwrap()).is_ok());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Manifest::parse(b"not json", TxId::parse(&"a".repeat(43)).unwrap()).is_err());
    }

    #[test]
    fn rejects_malformed_tx_id_in_paths() {
        let bytes = br#"{"index": {"path": "index.html"}, "paths": {"index.html": {"id": "short"}}}"#;
        assert!(Manifest::parse(bytes, TxId::parse(&"a".repeat(43)).unwrap()).is_err());
    }

    #[test]
    fn rejects_oversized_manifest() {
        let huge = vec![b' '; (MAX_MANIFEST_BYTES + 1) as usize];
        assert!(matches!(
            Manifest::parse(&huge, TxId::parse(&"a".repeat(43)).unwrap()),
            Err(VerifyError::TooLarge { .. })
        ));
    }

    #[test]
    fn normalise_strips_leading_slash_and_collapses() {
        assert_eq!(normalise_path("/a//b/c"), "a/b/c");
        assert_eq!(normalise_path("a/b"), "a/b");
        assert_eq!(normalise_path(""), "");
    }

    #[test]
    fn normalise_never_follows_dotdot() {
        assert_eq!(normalise_path("/../../etc/passwd"), "etc/passwd");
        assert_eq!(normalise_path("a/../b"), "a/b");
    }

    #[test]
    fn normalise_preserves_trailing_slash() {
        assert_eq!(normalise_path("/sub/"), "sub/");
    }
}
