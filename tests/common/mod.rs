// Shared fixtures: synthetic NIfTI files and a segmenter test double.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use spine_landmarks::engine::registry::TaskSpec;
use spine_landmarks::model::{SegmentRequest, Segmenter};
use spine_landmarks::volume::{write_nifti, SpatialMetadata};

pub const MB: u64 = 1024 * 1024;

/// Write a u8 mask with the given (x, y, z) voxels set.
pub fn write_mask(path: &Path, dims: [usize; 3], voxels: &[[usize; 3]]) {
    let mut data = vec![0u8; dims.iter().product()];
    for &[x, y, z] in voxels {
        data[x + dims[0] * (y + dims[1] * z)] = 1;
    }
    write_nifti(path, dims, &SpatialMetadata::default(), &data).unwrap();
}

/// Write an all-zero scan with the given geometry.
pub fn write_scan(path: &Path, dims: [usize; 3], spatial: &SpatialMetadata) {
    let data = vec![0u8; dims.iter().product()];
    write_nifti(path, dims, spatial, &data).unwrap();
}

/// Plays the external model: writes fixed masks instead of running inference.
pub struct FakeSegmenter {
    dims: [usize; 3],
    masks: Vec<(String, Vec<[usize; 3]>)>,
    corrupt: Vec<String>,
    segment_error: Option<String>,
    prepare_error: Option<String>,
    /// When set, preparing weights drops a file into this weights directory.
    weights_dir: Option<PathBuf>,
    /// Time spent "running the model" before masks are written.
    delay: Duration,
    /// Segment calls that ran to the end.
    pub completed: AtomicUsize,
    pub requests: Mutex<Vec<SegmentRequest>>,
    pub prepared: Mutex<Vec<String>>,
}

impl FakeSegmenter {
    pub fn new(dims: [usize; 3]) -> Self {
        Self {
            dims,
            masks: Vec::new(),
            corrupt: Vec::new(),
            segment_error: None,
            prepare_error: None,
            weights_dir: None,
            delay: Duration::ZERO,
            completed: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            prepared: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mask(mut self, structure: &str, voxels: &[[usize; 3]]) -> Self {
        self.masks.push((structure.to_string(), voxels.to_vec()));
        self
    }

    pub fn with_corrupt_mask(mut self, structure: &str) -> Self {
        self.corrupt.push(structure.to_string());
        self
    }

    pub fn failing_segment(mut self, message: &str) -> Self {
        self.segment_error = Some(message.to_string());
        self
    }

    pub fn failing_prepare(mut self, message: &str) -> Self {
        self.prepare_error = Some(message.to_string());
        self
    }

    pub fn writing_weights_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.weights_dir = Some(dir.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn completed_runs(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<SegmentRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl Segmenter for FakeSegmenter {
    async fn segment(&self, request: &SegmentRequest) -> Result<()> {
        self.requests.lock().push(request.clone());
        if let Some(message) = &self.segment_error {
            bail!("{}", message);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        for (structure, voxels) in &self.masks {
            let path = request.output_dir.join(format!("{structure}.nii.gz"));
            write_mask(&path, self.dims, voxels);
        }
        for structure in &self.corrupt {
            let path = request.output_dir.join(format!("{structure}.nii.gz"));
            fs::write(path, b"\x1f\x8bnot really gzip")?;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn prepare_weights(&self, task: &TaskSpec) -> Result<()> {
        self.prepared.lock().push(task.id.to_string());
        if let Some(message) = &self.prepare_error {
            bail!("{}", message);
        }
        if let Some(dir) = &self.weights_dir {
            let fold = dir.join("Dataset291_TotalSegmentator/fold_0");
            fs::create_dir_all(&fold)?;
            fs::write(fold.join("checkpoint_final.pth"), vec![7u8; 4096])?;
        }
        Ok(())
    }
}
