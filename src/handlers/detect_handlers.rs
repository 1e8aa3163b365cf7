//! Upload endpoint: multipart files in, batch report out.

use crate::{
    errors::AppError,
    models::{batch::BatchReport, params::ParamOverrides, upload::UploadedFile},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, State},
};
use tracing::debug;

/// Multipart part names that carry files.
const FILE_FIELDS: [&str; 2] = ["files", "file"];

/// `POST /detect`
///
/// Every `files` part is an upload; other text parts may override detection
/// parameters (`conf_thres`, `iou_thres`, `max_det`, `imgsz`, `device`,
/// `vid_stride`). Responds 400 when nothing usable was uploaded.
pub async fn detect_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BatchReport>, AppError> {
    let mut files = Vec::new();
    let mut overrides = ParamOverrides::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if FILE_FIELDS.contains(&name.as_str()) {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await?;
            debug!("received upload {} ({} bytes)", filename, bytes.len());
            files.push(UploadedFile::new(filename, bytes));
        } else {
            let value = field.text().await?;
            overrides.set_field(&name, &value)?;
        }
    }

    let params = state.params.with_overrides(&overrides)?;
    if !overrides.is_empty() {
        debug!("request parameters: {:?}", params);
    }

    let report = state.batch.process_batch_checked(files, &params).await?;
    Ok(Json(report))
}
