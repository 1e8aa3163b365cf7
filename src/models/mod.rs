//! Core data models for the detection gallery.
//!
//! These types describe what flows through the pipeline: uploaded files,
//! raw detections coming back from the model, the artifacts written to disk
//! and the gallery views derived from the directory tree. They serialize
//! naturally as JSON via `serde`.

pub mod artifact;
pub mod batch;
pub mod detection;
pub mod gallery;
pub mod params;
pub mod upload;
