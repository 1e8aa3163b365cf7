//! Request-scoped batch results.

use crate::models::{
    artifact::{SavedArtifact, StorageFailure},
    upload::{MediaKind, UploadNotice},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline step at which a whole file was given up on.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    Store,
    Detect,
    Decode,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileFailure {
    pub stage: FileStage,
    pub error: String,
}

/// What happened to one accepted upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileReport {
    pub filename: String,
    /// Unique name the upload was stored under, if storing succeeded.
    pub stored_name: Option<String>,
    pub kind: MediaKind,
    pub detections: usize,
    pub artifacts: usize,
    /// Set when the file contributed nothing because a whole step failed.
    pub failure: Option<FileFailure>,
    /// Individual saves that were skipped.
    pub storage_failures: Vec<StorageFailure>,
}

/// Result of one upload batch. Owned by the request that produced it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: Uuid,
    /// Flat list of crops across every file, in upload then detection order.
    pub artifacts: Vec<SavedArtifact>,
    pub notices: Vec<UploadNotice>,
    pub files: Vec<FileReport>,
    pub completed_at: DateTime<Utc>,
}

impl BatchReport {
    /// True when no upload survived validation.
    pub fn is_empty_batch(&self) -> bool {
        self.files.is_empty()
    }

    pub fn failed_files(&self) -> usize {
        self.files.iter().filter(|f| f.failure.is_some()).count()
    }
}
