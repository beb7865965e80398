// Disk usage accounting for the weights cache: recursive byte and file counts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::CacheError;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirUsage {
    pub bytes: u64,
    pub files: u64,
}

/// Megabytes rounded to 2 decimals, the unit the service reports sizes in.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    ((bytes as f64 / BYTES_PER_MB) * 100.0).round() / 100.0
}

/// Sum the sizes of every regular file below `root`. A missing root counts
/// as empty. Symlinks are not followed.
pub fn dir_usage(root: &Path) -> Result<DirUsage, CacheError> {
    let mut usage = DirUsage::default();
    if !root.exists() {
        return Ok(usage);
    }

    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| CacheError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| CacheError::io(&path, e))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let meta = entry.metadata().map_err(|e| CacheError::io(&path, e))?;
                usage.bytes += meta.len();
                usage.files += 1;
            }
        }
    }

    Ok(usage)
}

/// True when `dir` exists and has at least one entry.
pub fn has_entries(dir: &Path) -> Result<bool, CacheError> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::io(dir, e)),
    }
}
