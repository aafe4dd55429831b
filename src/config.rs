//! Tunables for the worker and browser, optionally read from a JSON file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Write buffer size for downloads (2 MB) - reduces I/O operations
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Objects requested per ListObjectsV2 page
pub const DEFAULT_PAGE_SIZE: i32 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Attempts per network call, including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Minimum number of newly listed entries between two list progress events.
    pub list_progress_interval: usize,
    pub write_buffer_size: usize,
    pub preview_max_bytes: usize,
    /// Records sampled when deciding between a CSV table and raw text.
    pub csv_sample_rows: usize,
    /// Parent directory for DownloadMany staging areas. OS temp dir when unset.
    pub staging_root: Option<PathBuf>,
    pub archive_file_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 4000,
            list_progress_interval: 1000,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            preview_max_bytes: 1024 * 1024,
            csv_sample_rows: 20,
            staging_root: None,
            archive_file_name: "s3_download.zip".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Delay before retry number `retry` (1-based), doubling up to the cap.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        let ms = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub page_size: i32,
    pub default_region: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
            default_region: "us-east-1".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        serde_json::from_str(&raw)
            .map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))
    }
}
