use std::path::PathBuf;

/// Voxel count at which the size-based confidence proxy saturates at 1.0.
pub const CONFIDENCE_SATURATION_VOXELS: u64 = 1000;

/// File-name prefix the segmentation model uses for vertebra masks.
pub const VERTEBRA_MASK_PREFIX: &str = "vertebrae_";

/// Extensions recognised as mask volumes, longest first.
pub const MASK_EXTENSIONS: &[&str] = &[".nii.gz", ".nii"];

/// Weights directory inside the model runtime's cache root.
pub const WEIGHTS_SUBDIR: &str = "nnunet/results";

/// Pause after every emitted download-progress event (100 ms) so a
/// streaming transport has time to flush.
pub const PROGRESS_PACING_MS: u64 = 100;

/// Number of structure names included in a model status as a sample.
pub const STATUS_STRUCTURE_SAMPLE: usize = 5;

/// Service version reported by the health and index routes.
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Top-level configuration for the landmark service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP listener binds to.
    pub host: String,
    pub port: u16,
    /// Enables debug-level logging.
    pub debug: bool,
    /// Root of the model runtime's weight cache (shared by all tasks).
    pub cache_root: PathBuf,
    /// Upper bound for an input scan accepted by the detect route.
    pub max_file_size_mb: u64,
    /// Executable that runs segmentation.
    pub segmentator_bin: String,
    /// Executable that fetches a task's weights.
    pub download_weights_bin: String,
    /// Delay after each download-progress event.
    pub progress_pacing_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            debug: false,
            cache_root: default_cache_root(),
            max_file_size_mb: 500,
            segmentator_bin: "TotalSegmentator".to_string(),
            download_weights_bin: "totalseg_download_weights".to_string(),
            progress_pacing_ms: PROGRESS_PACING_MS,
        }
    }
}

impl ServiceConfig {
    /// Build a config from process environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        if let Some(debug) = lookup("DEBUG") {
            config.debug = matches!(debug.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(root) = lookup("TOTALSEG_HOME_DIR") {
            config.cache_root = PathBuf::from(root);
        }
        if let Some(max) = lookup("MAX_FILE_SIZE_MB").and_then(|m| m.parse().ok()) {
            config.max_file_size_mb = max;
        }
        if let Some(bin) = lookup("SEGMENTATOR_BIN") {
            config.segmentator_bin = bin;
        }
        if let Some(bin) = lookup("DOWNLOAD_WEIGHTS_BIN") {
            config.download_weights_bin = bin;
        }
        if let Some(ms) = lookup("PROGRESS_PACING_MS").and_then(|m| m.parse().ok()) {
            config.progress_pacing_ms = ms;
        }

        config
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

fn default_cache_root() -> PathBuf {
    if let Ok(dir) = std::env::var("TOTALSEG_HOME_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".totalsegmentator")
}
