//! Pipeline configuration.
//!
//! The JSON configuration loader itself is an external collaborator (§1,
//! §6.4) — out of scope here. This module defines the typed struct an
//! external loader would populate, plus the `ConfigProvider` trait boundary
//! and a `MapConfigProvider` reference implementation used by tests and the
//! thin CLI binary.

use std::collections::HashMap;

/// Enumerated configuration keys and effects, per §6.4.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub base_url: String,
    pub data_dir: std::path::PathBuf,
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub wait_between_downloads_min_ms: u64,
    pub wait_between_downloads_max_ms: u64,
    pub cert_rotation_days: i64,
    pub extract_retries: u32,
    pub extract_retry_delay_ms: u64,
    pub db_lote_size_small: usize,
    pub db_lote_size_medium: usize,
    pub db_lote_size_large: usize,
    pub db_lote_max_bytes: usize,
    pub db_timeout_secs: u64,
    pub cache_default_ttl_secs: u64,
    pub cache_max_size: usize,
    /// Non-fatal by default per §9's open question; flips pin-mismatch to a
    /// hard `IntegrityViolation`.
    pub strict_cert_pinning: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://example-exchange.invalid/archives".to_string(),
            data_dir: std::path::PathBuf::from("./data"),
            max_retries: 3,
            backoff_factor: 2.0,
            wait_between_downloads_min_ms: 500,
            wait_between_downloads_max_ms: 2_000,
            cert_rotation_days: 30,
            extract_retries: 3,
            extract_retry_delay_ms: 500,
            db_lote_size_small: 500,
            db_lote_size_medium: 2_000,
            db_lote_size_large: 10_000,
            db_lote_max_bytes: 4 * 1024 * 1024,
            db_timeout_secs: 30,
            cache_default_ttl_secs: 300,
            cache_max_size: 1_000,
            strict_cert_pinning: false,
        }
    }
}

/// External configuration boundary: `get(key, default)`.
pub trait ConfigProvider {
    fn get(&self, key: &str, default: &str) -> String;
}

/// In-memory reference `ConfigProvider`, backed by a `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct MapConfigProvider {
    values: HashMap<String, String>,
}

impl MapConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl ConfigProvider for MapConfigProvider {
    fn get(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}
