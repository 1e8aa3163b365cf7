//! Work product of the pipeline: saved artifacts and per-item failures.

use serde::{Deserialize, Serialize};

/// A cropped-object image written under `detect/{class_name}/`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SavedArtifact {
    /// Path relative to the storage root, always with forward slashes.
    #[serde(rename = "path")]
    pub relative_path: String,

    pub class_name: String,
}

/// Which save step failed for a detection.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Original,
    Crop,
}

/// A save that was attempted and skipped.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StorageFailure {
    /// Position of the detection in the detector's output.
    pub detection_index: usize,
    pub class_name: String,
    pub kind: ArtifactKind,
    pub error: String,
}

/// Outcome of materializing one source file's detections.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// One entry per boxed detection whose crop was saved, in detection order.
    pub artifacts: Vec<SavedArtifact>,
    pub failures: Vec<StorageFailure>,
}
