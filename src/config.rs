//! Ambient configuration.
//!
//! Plain `serde`-deserialisable structs with sensible defaults, loadable
//! from the `INIT_WAYFINDER` control message.

use std::time::Duration;

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::wayfinder::WayfinderConfig;

/// Top-level configuration for a `VerifierService`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub wayfinder: WayfinderConfig,
    #[serde(default)]
    pub cache: CacheConfigDto,
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
}

fn default_init_timeout_ms() -> u64 {
    10_000
}

impl ProxyConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

/// Serde-friendly mirror of [`CacheConfig`] (which itself has no `Deserialize`
/// impl since it is also constructed programmatically in non-config paths).
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfigDto {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_max_entries() -> usize {
    200
}

fn default_max_bytes() -> u64 {
    256 * 1024 * 1024
}

impl Default for CacheConfigDto {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl From<CacheConfigDto> for CacheConfig {
    fn from(dto: CacheConfigDto) -> Self {
        CacheConfig {
            max_entries: dto.max_entries,
            max_bytes: dto.max_bytes,
        }
    }
}
