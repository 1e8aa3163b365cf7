//! Gallery listings and artifact downloads.

use crate::{
    errors::AppError,
    models::gallery::{ClassImages, GalleryView},
    services::gallery_service::GalleryRoot,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// `GET /gallery/crops`
pub async fn list_crops(State(state): State<AppState>) -> Result<Json<GalleryView>, AppError> {
    Ok(Json(state.gallery.gallery(GalleryRoot::Crops).await?))
}

/// `GET /gallery/originals`
pub async fn list_originals(
    State(state): State<AppState>,
) -> Result<Json<GalleryView>, AppError> {
    Ok(Json(state.gallery.gallery(GalleryRoot::Originals).await?))
}

/// `GET /gallery/crops/{class}`
pub async fn crop_class_images(
    State(state): State<AppState>,
    Path(class_name): Path<String>,
) -> Result<Json<ClassImages>, AppError> {
    Ok(Json(
        state
            .gallery
            .class_images(GalleryRoot::Crops, &class_name)
            .await?,
    ))
}

/// `GET /gallery/originals/{class}`
pub async fn original_class_images(
    State(state): State<AppState>,
    Path(class_name): Path<String>,
) -> Result<Json<ClassImages>, AppError> {
    Ok(Json(
        state
            .gallery
            .class_images(GalleryRoot::Originals, &class_name)
            .await?,
    ))
}

/// `GET /files/{*path}` streams one artifact image.
pub async fn get_artifact(
    State(state): State<AppState>,
    Path(relative_path): Path<String>,
) -> Result<Response, AppError> {
    let path = state.gallery.resolve_artifact(&relative_path).await?;
    let file = File::open(&path)
        .await
        .map_err(|err| AppError::internal(err.to_string()))?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&relative_path)),
    );
    Ok(response)
}

fn content_type_for(path: &str) -> &'static str {
    if path.ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    }
}
