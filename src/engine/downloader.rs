// Weight preparation with coarse phase reporting.
//
// The model runtime fetches weights opaquely, so byte-level progress cannot be
// observed. Callers get a fixed phase sequence instead:
// preparing(0.0) -> downloading(0.5) -> complete|ready(1.0), or error(0.0).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info};

use super::cache::{ModelCache, ModelStatus};
use super::registry::TaskSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadPhase {
    Starting,
    Preparing,
    Downloading,
    Complete,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadEvent {
    pub status: DownloadPhase,
    #[serde(default)]
    pub message: String,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ModelStatus>,
}

impl DownloadEvent {
    pub fn new(status: DownloadPhase, message: impl Into<String>, progress: f64) -> Self {
        Self {
            status,
            message: message.into(),
            progress,
            result: None,
        }
    }

    pub fn with_result(mut self, status: ModelStatus) -> Self {
        self.result = Some(status);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    /// Preparation finished; the status is re-read afterwards.
    Prepared(ModelStatus),
    Failed(String),
}

/// Pushes events to the sink, pausing after each one so a streaming
/// transport can flush. A closed sink is not an error.
struct PhaseReporter {
    sink: UnboundedSender<DownloadEvent>,
    pacing: Duration,
}

impl PhaseReporter {
    async fn emit(&self, event: DownloadEvent) {
        debug!("download phase {:?} ({})", event.status, event.progress);
        if self.sink.send(event).is_err() {
            debug!("progress receiver dropped; continuing");
        }
        if !self.pacing.is_zero() {
            tokio::time::sleep(self.pacing).await;
        }
    }

    async fn fail(&self, message: String) -> DownloadOutcome {
        error!("{}", message);
        self.emit(DownloadEvent::new(DownloadPhase::Error, message.clone(), 0.0))
            .await;
        DownloadOutcome::Failed(message)
    }
}

pub(crate) async fn prepare(
    cache: &ModelCache,
    task: &TaskSpec,
    sink: UnboundedSender<DownloadEvent>,
) -> DownloadOutcome {
    let reporter = PhaseReporter {
        sink,
        pacing: cache.pacing(),
    };

    reporter
        .emit(DownloadEvent::new(
            DownloadPhase::Preparing,
            format!("Preparing to download {}", task.name),
            0.0,
        ))
        .await;
    reporter
        .emit(DownloadEvent::new(
            DownloadPhase::Downloading,
            "Model runtime is fetching weights...",
            0.5,
        ))
        .await;

    if let Err(e) = cache.segmenter().prepare_weights(task).await {
        return reporter
            .fail(format!("Failed to prepare models: {:#}", e))
            .await;
    }

    let status = {
        let cache = cache.clone();
        let task_id = task.id;
        tokio::task::spawn_blocking(move || cache.status(task_id)).await
    };
    let status = match status {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return reporter.fail(format!("Failed to prepare models: {}", e)).await,
        Err(e) => return reporter.fail(format!("status check panicked: {}", e)).await,
    };

    let (phase, message) = if status.downloaded {
        (DownloadPhase::Complete, "Models ready")
    } else {
        (DownloadPhase::Ready, "Ready for first use")
    };
    info!("{} weights: {}", task.id, message);
    reporter
        .emit(DownloadEvent::new(phase, message, 1.0))
        .await;

    DownloadOutcome::Prepared(status)
}
