//! Shared handler state. Everything here is read-only or internally
//! synchronized; per-batch results live only in the request that made them.

use crate::{
    models::params::DetectionParams,
    services::{batch_service::BatchOrchestrator, gallery_service::GalleryService},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub batch: BatchOrchestrator,
    pub gallery: GalleryService,
    /// Configured defaults; requests apply their overrides to a copy.
    pub params: Arc<DetectionParams>,
}
