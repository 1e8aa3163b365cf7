use anyhow::{Context, Result};
use axum::Router;
use config::{AppConfig, DetectorBackend};
use services::{
    batch_service::BatchOrchestrator,
    detection_service::{CommandDetector, Detector, HttpDetector, HttpDetectorConfig},
    gallery_service::GalleryService,
    materializer::Materializer,
};
use state::AppState;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!("Starting detect-gallery with config: {:?}", cfg);

    // --- Ensure storage + upload directories exist ---
    for dir in [&cfg.storage_dir, &cfg.upload_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir))?;
            tracing::info!("Created directory at {}", dir);
        }
    }

    // --- Initialize services ---
    let detector = build_detector(&cfg.detector)?;
    tracing::info!("Using detector {}", detector.name());

    let materializer = Materializer::new(&cfg.storage_dir, cfg.jpeg_quality);
    let state = AppState {
        batch: BatchOrchestrator::new(detector, materializer, &cfg.upload_dir),
        gallery: GalleryService::new(&cfg.storage_dir),
        params: Arc::new(cfg.params.clone()),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Pick the detection collaborator named by the configuration.
fn build_detector(backend: &DetectorBackend) -> Result<Arc<dyn Detector>> {
    let detector: Arc<dyn Detector> = match backend {
        DetectorBackend::Command(line) => Arc::new(
            CommandDetector::from_command_line(line)
                .with_context(|| format!("detector command `{}` is empty", line))?,
        ),
        DetectorBackend::Http { base_url, timeout } => Arc::new(
            HttpDetector::new(HttpDetectorConfig {
                base_url: base_url.clone(),
                timeout: *timeout,
            })
            .context("building detector HTTP client")?,
        ),
    };
    Ok(detector)
}
