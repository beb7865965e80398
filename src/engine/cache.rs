// Model weights cache: stateless status, stats, eviction and preparation over
// the model runtime's shared cache root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use super::downloader::{self, DownloadEvent, DownloadOutcome};
use super::registry::{self, TaskSpec};
use super::stats::{bytes_to_mb, dir_usage, has_entries};
use crate::config::{PROGRESS_PACING_MS, STATUS_STRUCTURE_SAMPLE, WEIGHTS_SUBDIR};
use crate::error::CacheError;
use crate::model::Segmenter;

/// On-disk state of one task's weights, derived at query time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub task: String,
    pub name: String,
    pub description: String,
    pub downloaded: bool,
    /// Measured when downloaded, the registry estimate otherwise.
    pub size_bytes: u64,
    pub size_mb: f64,
    pub estimated: bool,
    pub cache_path: PathBuf,
    /// First few structures of the task, as a sample.
    pub structures: Vec<String>,
}

/// Per-task entry of [`ModelCache::status_all`]. One unreadable task does
/// not hide the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskStatusEntry {
    Ready(ModelStatus),
    Failed { task: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub cache_directory: PathBuf,
    pub total_size_bytes: u64,
    pub total_size_mb: f64,
    pub file_count: u64,
    pub models: BTreeMap<String, TaskStatusEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub success: bool,
    pub message: String,
    pub freed_bytes: u64,
    pub freed_space_mb: f64,
}

/// Query and command layer over the weights cache. Holds no cached state:
/// every call re-reads the filesystem.
#[derive(Clone)]
pub struct ModelCache {
    root: PathBuf,
    segmenter: Arc<dyn Segmenter>,
    pacing: Duration,
}

impl ModelCache {
    pub fn new(root: impl Into<PathBuf>, segmenter: Arc<dyn Segmenter>) -> Self {
        Self {
            root: root.into(),
            segmenter,
            pacing: Duration::from_millis(PROGRESS_PACING_MS),
        }
    }

    /// Delay after every emitted download-progress event.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn weights_dir(&self) -> PathBuf {
        self.root.join(WEIGHTS_SUBDIR)
    }

    fn task(task_id: &str) -> Result<&'static TaskSpec, CacheError> {
        registry::lookup(task_id).ok_or_else(|| CacheError::UnknownTask {
            task: task_id.to_string(),
            available: registry::task_ids(),
        })
    }

    fn status_of(&self, task: &TaskSpec) -> Result<ModelStatus, CacheError> {
        let weights = self.weights_dir();
        let downloaded = has_entries(&weights)?;
        let size_bytes = if downloaded {
            dir_usage(&weights)?.bytes
        } else {
            task.approximate_size_mb * 1024 * 1024
        };

        Ok(ModelStatus {
            task: task.id.to_string(),
            name: task.name.to_string(),
            description: task.description.to_string(),
            downloaded,
            size_bytes,
            size_mb: if downloaded {
                bytes_to_mb(size_bytes)
            } else {
                task.approximate_size_mb as f64
            },
            estimated: !downloaded,
            cache_path: weights,
            structures: task
                .structures
                .iter()
                .take(STATUS_STRUCTURE_SAMPLE)
                .map(|s| s.to_string())
                .collect(),
        })
    }

    pub fn status(&self, task_id: &str) -> Result<ModelStatus, CacheError> {
        self.status_of(Self::task(task_id)?)
    }

    pub fn status_all(&self) -> BTreeMap<String, TaskStatusEntry> {
        registry::TASKS
            .iter()
            .map(|task| {
                let entry = match self.status_of(task) {
                    Ok(status) => TaskStatusEntry::Ready(status),
                    Err(e) => {
                        warn!("status for {} unavailable: {}", task.id, e);
                        TaskStatusEntry::Failed {
                            task: task.id.to_string(),
                            error: e.to_string(),
                        }
                    }
                };
                (task.id.to_string(), entry)
            })
            .collect()
    }

    /// Totals across the whole cache root. The runtime stores every task's
    /// weights together, so there is no per-task breakdown.
    pub fn cache_stats(&self) -> Result<CacheStats, CacheError> {
        let usage = dir_usage(&self.root)?;
        Ok(CacheStats {
            cache_directory: self.root.clone(),
            total_size_bytes: usage.bytes,
            total_size_mb: bytes_to_mb(usage.bytes),
            file_count: usage.files,
            models: self.status_all(),
        })
    }

    /// Remove cached weights for `task_id`.
    ///
    /// The runtime does not partition its cache per task, so this deletes the
    /// entire cache root, evicting every task's weights.
    pub fn delete(&self, task_id: &str) -> Result<DeleteOutcome, CacheError> {
        let task = Self::task(task_id)?;

        // An absent root counts as empty.
        let usage = dir_usage(&self.root)?;
        if usage.files == 0 {
            return Ok(DeleteOutcome {
                success: false,
                message: "No models found to delete".to_string(),
                freed_bytes: 0,
                freed_space_mb: 0.0,
            });
        }

        let freed = usage.bytes;
        warn!(
            "deleting shared model cache {} for task {} (affects all tasks)",
            self.root.display(),
            task.id
        );
        fs::remove_dir_all(&self.root).map_err(|e| CacheError::io(&self.root, e))?;
        info!("freed {} bytes from model cache", freed);

        Ok(DeleteOutcome {
            success: true,
            message: format!("Deleted {} models (shared cache removed)", task.id),
            freed_bytes: freed,
            freed_space_mb: bytes_to_mb(freed),
        })
    }

    /// Prepare a task's weights, reporting coarse phases to `sink`.
    ///
    /// Only an unknown task is an `Err`; a failed preparation is reported as
    /// an `error` event and [`DownloadOutcome::Failed`].
    pub async fn download(
        &self,
        task_id: &str,
        sink: UnboundedSender<DownloadEvent>,
    ) -> Result<DownloadOutcome, CacheError> {
        let task = Self::task(task_id)?;
        Ok(downloader::prepare(self, task, sink).await)
    }

    pub(crate) fn segmenter(&self) -> &dyn Segmenter {
        self.segmenter.as_ref()
    }

    pub(crate) fn pacing(&self) -> Duration {
        self.pacing
    }
}
