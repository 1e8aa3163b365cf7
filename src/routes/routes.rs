//! Defines routes for uploads, gallery listings and artifact downloads.
//!
//! ## Structure
//! - **Health**
//!   - `GET  /healthz`, `GET /readyz`
//!
//! - **Pipeline**
//!   - `POST /detect` — multipart upload, returns the batch report
//!
//! - **Gallery**
//!   - `GET  /gallery/crops` / `GET /gallery/originals` — class folders + cover images
//!   - `GET  /gallery/crops/{class}` / `GET /gallery/originals/{class}` — images of one class
//!   - `GET  /files/{*path}` — download one artifact, e.g. `detect/cat/x.jpg`

use crate::{
    handlers::{
        detect_handlers::detect_upload,
        gallery_handlers::{
            crop_class_images, get_artifact, list_crops, list_originals, original_class_images,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for every endpoint.
///
/// `max_upload_bytes` bounds the multipart body of `POST /detect`.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/detect",
            post(detect_upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/gallery/crops", get(list_crops))
        .route("/gallery/crops/{class}", get(crop_class_images))
        .route("/gallery/originals", get(list_originals))
        .route("/gallery/originals/{class}", get(original_class_images))
        .route("/files/{*path}", get(get_artifact))
}
