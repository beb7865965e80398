// Inference orchestration: run the segmenter into a scoped scratch directory,
// parse its masks, and package the outcome with timing.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::extract::{extract, LabelFilter, LandmarkRecord};
use super::registry::VERTEBRA_STRUCTURES;
use crate::model::{Device, SegmentRequest, Segmenter};
use crate::volume::load_metadata;

#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub input: PathBuf,
    /// Structures to segment. Empty means every vertebra.
    pub structures: Vec<String>,
    pub device: Device,
    pub fast_mode: bool,
}

impl InferenceRequest {
    pub fn new(input: impl Into<PathBuf>, device: Device) -> Self {
        Self {
            input: input.into(),
            structures: Vec::new(),
            device,
            fast_mode: true,
        }
    }

    pub fn fast_mode(mut self, fast_mode: bool) -> Self {
        self.fast_mode = fast_mode;
        self
    }

    pub fn structures(mut self, structures: Vec<String>) -> Self {
        self.structures = structures;
        self
    }
}

/// Outcome of one run. Failures are values, never panics or errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub success: bool,
    #[serde(default)]
    pub vertebrae: Vec<LandmarkRecord>,
    pub processing_time_ms: f64,
    pub device: Device,
    pub fast_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

pub struct InferenceEngine {
    segmenter: Arc<dyn Segmenter>,
    filter: LabelFilter,
}

impl InferenceEngine {
    pub fn new(segmenter: Arc<dyn Segmenter>) -> Self {
        Self {
            segmenter,
            filter: LabelFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: LabelFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Segment `request.input` and extract ordered landmarks. Runs once,
    /// without retries.
    pub async fn run(&self, request: &InferenceRequest) -> InferenceResult {
        let started = Instant::now();
        let outcome = self.segment_and_extract(request).await;
        let processing_time_ms = elapsed_ms(started);

        match outcome {
            Ok(vertebrae) => {
                info!(
                    "found {} vertebrae in {} ({} ms)",
                    vertebrae.len(),
                    request.input.display(),
                    processing_time_ms
                );
                InferenceResult {
                    success: true,
                    vertebrae,
                    processing_time_ms,
                    device: request.device,
                    fast_mode: request.fast_mode,
                    error: None,
                }
            }
            Err(e) => {
                error!("inference on {} failed: {:#}", request.input.display(), e);
                InferenceResult {
                    success: false,
                    vertebrae: Vec::new(),
                    processing_time_ms,
                    device: request.device,
                    fast_mode: request.fast_mode,
                    error: Some(format!("{:#}", e)),
                }
            }
        }
    }

    async fn segment_and_extract(&self, request: &InferenceRequest) -> Result<Vec<LandmarkRecord>> {
        let input = request.input.clone();
        let meta = tokio::task::spawn_blocking(move || load_metadata(&input))
            .await?
            .map_err(|e| anyhow!("failed to load input volume: {}", e))?;

        // Removed on drop, whichever way this function exits.
        let scratch = tempfile::Builder::new()
            .prefix("spine-landmarks-")
            .tempdir()?;

        let structures = if request.structures.is_empty() {
            VERTEBRA_STRUCTURES.iter().map(|s| s.to_string()).collect()
        } else {
            request.structures.clone()
        };

        self.segmenter
            .segment(&SegmentRequest {
                input: request.input.clone(),
                output_dir: scratch.path().to_path_buf(),
                structures,
                device: request.device,
                fast: request.fast_mode,
            })
            .await?;

        let dir = scratch.path().to_path_buf();
        let spatial = meta.spatial;
        let filter = self.filter.clone();
        let records = tokio::task::spawn_blocking(move || extract(&dir, &spatial, &filter)).await??;

        drop(scratch);
        Ok(records)
    }
}
