//! Upload-side types: what the client sent and what we persisted.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw bytes + client filename, alive only for the request.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// Still images are decoded and cropped; videos only go to the detector.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Still,
    Video,
}

/// An upload persisted under a generated unique name.
#[derive(Clone, Debug)]
pub struct StoredSourceFile {
    /// Filename the client used (after path components were stripped).
    pub original_name: String,

    /// `{stem}_{16hex}{ext}` with a lower-cased extension.
    pub stored_name: String,

    pub path: PathBuf,
}

/// User-visible message about an upload that was skipped.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadNotice {
    pub filename: String,
    pub message: String,
}
