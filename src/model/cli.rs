// Segmenter backed by the TotalSegmentator command line tools.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::traits::{Device, SegmentRequest, Segmenter};
use crate::config::ServiceConfig;
use crate::engine::registry::TaskSpec;

/// Lines of stderr kept in the error of a failed run.
const STDERR_TAIL_LINES: usize = 20;

pub struct TotalSegmentatorCli {
    segmentator_bin: String,
    download_weights_bin: String,
    cache_root: PathBuf,
}

impl TotalSegmentatorCli {
    pub fn new(
        segmentator_bin: impl Into<String>,
        download_weights_bin: impl Into<String>,
        cache_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            segmentator_bin: segmentator_bin.into(),
            download_weights_bin: download_weights_bin.into(),
            cache_root: cache_root.into(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            config.segmentator_bin.clone(),
            config.download_weights_bin.clone(),
            config.cache_root.clone(),
        )
    }

    fn segment_args(request: &SegmentRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            request.input.clone().into(),
            "-o".into(),
            request.output_dir.clone().into(),
        ];
        if !request.structures.is_empty() {
            args.push("--roi_subset".into());
            args.extend(request.structures.iter().map(OsString::from));
        }
        if request.fast {
            args.push("--fast".into());
        }
        args.push("--device".into());
        // The CLI names CUDA devices "gpu".
        args.push(match request.device {
            Device::Cpu => "cpu".into(),
            Device::Cuda => "gpu".into(),
        });
        args
    }

    async fn run(&self, program: &str, args: Vec<OsString>) -> Result<()> {
        debug!("running {} {:?}", program, args);
        let output = Command::new(program)
            .args(&args)
            .env("TOTALSEG_HOME_DIR", &self.cache_root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // Never outlive the scratch directory the child writes into.
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow!("failed to launch {}: {}", program, e))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        Err(anyhow!("{} exited with {}: {}", program, output.status, tail.trim()))
    }
}

#[async_trait]
impl Segmenter for TotalSegmentatorCli {
    async fn segment(&self, request: &SegmentRequest) -> Result<()> {
        info!(
            "segmenting {} ({} structures, device={}, fast={})",
            request.input.display(),
            request.structures.len(),
            request.device,
            request.fast
        );
        self.run(&self.segmentator_bin, Self::segment_args(request))
            .await
    }

    async fn prepare_weights(&self, task: &TaskSpec) -> Result<()> {
        info!(
            "preparing weights for {} (runtime task {})",
            task.id, task.runtime_task
        );
        let args = vec![OsString::from("-t"), OsString::from(task.runtime_task)];
        self.run(&self.download_weights_bin, args).await
    }
}
