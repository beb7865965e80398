use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use spine_landmarks::api::init_tracing;
use spine_landmarks::config::{ServiceConfig, SERVICE_VERSION};
use spine_landmarks::engine::cache::ModelCache;
use spine_landmarks::engine::inference::InferenceEngine;
use spine_landmarks::model::{Device, Segmenter, TotalSegmentatorCli};
use spine_landmarks::server::{AppState, LandmarkServer};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::from_env();
    init_tracing(config.debug);

    info!("spine-landmarks {}", SERVICE_VERSION);
    info!("model cache: {}", config.cache_root.display());
    info!("default device: {}", Device::detect());

    let segmenter: Arc<dyn Segmenter> = Arc::new(TotalSegmentatorCli::from_config(&config));
    let cache = ModelCache::new(config.cache_root.clone(), Arc::clone(&segmenter))
        .with_pacing(std::time::Duration::from_millis(config.progress_pacing_ms));
    let engine = Arc::new(InferenceEngine::new(segmenter));

    let bind_addr = config.bind_addr();
    let state = AppState {
        cache,
        engine,
        config: Arc::new(config),
    };
    let server = LandmarkServer::start(&bind_addr, state).await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
    }
    info!("shutting down");
    server.shutdown().await;
    Ok(())
}
