// Typed failure kinds for the places where callers branch on what went wrong.

use std::path::PathBuf;

/// A scan or mask file could not be turned into a volume.
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unrecognised volume format: {0}")]
    UnknownFormat(PathBuf),

    #[error("malformed volume header: {0}")]
    Header(String),

    #[error("unsupported {0}")]
    Unsupported(String),

    #[error("voxel data truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
}

impl VolumeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that abort a whole mask extraction. Per-file failures are not
/// represented here; they are skipped and logged.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("mask directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    #[error("malformed spatial metadata: {0}")]
    MalformedMetadata(String),

    #[error("failed to list mask directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors from the model cache manager.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Unknown task: {task} (available: {})", available.join(", "))]
    UnknownTask {
        task: String,
        available: Vec<String>,
    },

    #[error("cache I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
