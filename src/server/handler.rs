// Axum request handlers: expose inference and model cache operations over HTTP.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ServiceConfig, SERVICE_VERSION};
use crate::engine::cache::{CacheStats, DeleteOutcome, ModelCache, ModelStatus, TaskStatusEntry};
use crate::engine::downloader::{DownloadEvent, DownloadOutcome, DownloadPhase};
use crate::engine::inference::{elapsed_ms, InferenceEngine, InferenceRequest, InferenceResult};
use crate::engine::registry;
use crate::error::CacheError;
use crate::model::Device;

const SERVICE_NAME: &str = "Spine Landmark Service";

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub cache: ModelCache,
    pub engine: Arc<InferenceEngine>,
    pub config: Arc<ServiceConfig>,
}

pub struct LandmarkServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    serve_task: JoinHandle<()>,
}

impl LandmarkServer {
    /// Bind `bind_addr` (port 0 picks a free port) and start serving.
    pub async fn start(bind_addr: &str, state: AppState) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);

        let serve_task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                error!("server stopped with error: {}", e);
            }
        });

        info!("listening on http://{}", addr);
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            serve_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Absolute URL for a route on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.serve_task.await;
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/health", get(health_handler))
        .route("/api/models/status", get(model_status_handler))
        .route("/api/models/all", get(all_models_handler))
        .route("/api/models/cache-stats", get(cache_stats_handler))
        .route("/api/models/download/{task}", post(download_handler))
        .route("/api/models/{task}", delete(delete_handler))
        .route("/api/detect-vertebrae", post(detect_handler))
        .with_state(state)
}

/// Error body is `{"detail": "..."}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        let status = match e {
            CacheError::UnknownTask { .. } => StatusCode::NOT_FOUND,
            CacheError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{}", self.detail);
        }
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Run a filesystem-bound cache call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CacheError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(ApiError::from)
}

/// GET /
async fn index_handler() -> Json<Value> {
    Json(json!({
        "name": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "status": "running",
        "endpoints": {
            "health": "/api/health",
            "models_status": "/api/models/status?task=vertebrae",
            "all_models": "/api/models/all",
            "cache_stats": "/api/models/cache-stats",
            "download_model": "/api/models/download/{task}",
            "delete_model": "/api/models/{task}",
            "detect_vertebrae": "/api/detect-vertebrae",
        },
    }))
}

/// GET /api/health
async fn health_handler() -> Json<Value> {
    let cuda_available = Device::cuda_available();
    Json(json!({
        "status": "healthy",
        "message": format!("{} is running", SERVICE_NAME),
        "version": SERVICE_VERSION,
        "device": Device::detect(),
        "cuda_available": cuda_available,
    }))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    #[serde(default = "default_task")]
    task: String,
}

fn default_task() -> String {
    "vertebrae".to_string()
}

/// GET /api/models/status?task=
async fn model_status_handler(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<ModelStatus>, ApiError> {
    let cache = state.cache.clone();
    blocking(move || cache.status(&query.task)).await.map(Json)
}

/// GET /api/models/all
async fn all_models_handler(
    State(state): State<AppState>,
) -> Result<Json<std::collections::BTreeMap<String, TaskStatusEntry>>, ApiError> {
    let cache = state.cache.clone();
    blocking(move || Ok(cache.status_all())).await.map(Json)
}

/// GET /api/models/cache-stats
async fn cache_stats_handler(State(state): State<AppState>) -> Result<Json<CacheStats>, ApiError> {
    let cache = state.cache.clone();
    blocking(move || cache.cache_stats()).await.map(Json)
}

/// DELETE /api/models/{task}: removes the whole shared cache.
async fn delete_handler(
    State(state): State<AppState>,
    Path(task): Path<String>,
) -> Result<Json<DeleteOutcome>, ApiError> {
    let cache = state.cache.clone();
    blocking(move || cache.delete(&task)).await.map(Json)
}

fn sse_event(event: &DownloadEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|e| {
        warn!("failed to encode progress event: {}", e);
        Event::default().comment("unencodable event")
    })
}

/// POST /api/models/download/{task}: progress as server-sent events.
///
/// The preparation runs in its own task: a client that disconnects does not
/// cancel it.
async fn download_handler(
    State(state): State<AppState>,
    Path(task): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if registry::lookup(&task).is_none() {
        return Err(CacheError::UnknownTask {
            task,
            available: registry::task_ids(),
        }
        .into());
    }

    let (tx, rx) = mpsc::unbounded_channel::<DownloadEvent>();
    let _ = tx.send(DownloadEvent::new(DownloadPhase::Starting, "", 0.0));

    let cache = state.cache.clone();
    tokio::spawn(async move {
        let last = match cache.download(&task, tx.clone()).await {
            Ok(DownloadOutcome::Prepared(status)) => Some(
                DownloadEvent::new(DownloadPhase::Complete, "Download finished", 1.0)
                    .with_result(status),
            ),
            // The error phase has already been sent.
            Ok(DownloadOutcome::Failed(_)) => None,
            Err(e) => Some(DownloadEvent::new(DownloadPhase::Error, e.to_string(), 0.0)),
        };
        if let Some(event) = last {
            let _ = tx.send(event);
        }
        debug!("download stream for {} finished", task);
    });

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(sse_event(&event)), rx))
    });
    Ok(Sse::new(events))
}

#[derive(Debug, Deserialize)]
struct DetectRequest {
    file_path: String,
    #[serde(default = "default_fast_mode")]
    fast_mode: bool,
    #[serde(default)]
    device: Option<String>,
}

fn default_fast_mode() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct DetectResponse {
    #[serde(flatten)]
    result: InferenceResult,
    total_time_ms: f64,
}

/// POST /api/detect-vertebrae
///
/// Inference runs in its own task and finishes even if the caller goes away.
async fn detect_handler(
    State(state): State<AppState>,
    Json(request): Json<DetectRequest>,
) -> Result<Json<DetectResponse>, ApiError> {
    let started = Instant::now();
    let path = PathBuf::from(&request.file_path);

    let meta = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::new(
                StatusCode::NOT_FOUND,
                format!("File not found: {}", request.file_path),
            ))
        }
        Err(e) => {
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Cannot stat {}: {}", request.file_path, e),
            ))
        }
    };
    if !meta.is_file() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Not a file: {}", request.file_path),
        ));
    }
    if meta.len() > state.config.max_file_size_bytes() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!(
                "File too large: {:.1}MB (max: {}MB)",
                meta.len() as f64 / (1024.0 * 1024.0),
                state.config.max_file_size_mb
            ),
        ));
    }

    let device = match request.device.as_deref() {
        Some(name) => name
            .parse::<Device>()
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?,
        None => Device::detect(),
    };

    let inference = InferenceRequest::new(path, device).fast_mode(request.fast_mode);
    // Spawned so a client disconnect does not cancel the model mid-run.
    let engine = Arc::clone(&state.engine);
    let result = tokio::spawn(async move { engine.run(&inference).await })
        .await
        .map_err(|e| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("inference task failed: {}", e),
            )
        })?;

    Ok(Json(DetectResponse {
        result,
        total_time_ms: elapsed_ms(started),
    }))
}
