use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::registry::TaskSpec;

/// Compute device the model runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

/// Present when an NVIDIA kernel driver is loaded.
const NVIDIA_DRIVER_PROC: &str = "/proc/driver/nvidia/version";

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }

    pub fn cuda_available() -> bool {
        Path::new(NVIDIA_DRIVER_PROC).exists()
    }

    /// Cuda when a driver is present, otherwise Cpu.
    pub fn detect() -> Self {
        if Self::cuda_available() {
            Device::Cuda
        } else {
            Device::Cpu
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(anyhow!("unsupported device '{}' (expected cpu or cuda)", other)),
        }
    }
}

/// One segmentation run: read `input`, write one mask file per structure
/// into `output_dir`, named `<structure>.nii.gz`.
#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub structures: Vec<String>,
    pub device: Device,
    pub fast: bool,
}

/// The external segmentation model. Failures are reported as errors, never
/// as partial output.
#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment(&self, request: &SegmentRequest) -> Result<()>;

    /// Make a task's weights available locally. Runtimes that fetch weights
    /// lazily may treat this as a no-op.
    async fn prepare_weights(&self, task: &TaskSpec) -> Result<()> {
        let _ = task;
        Ok(())
    }
}
