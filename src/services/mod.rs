//! Pipeline services, leaf first: naming, validation, detection,
//! materialization, gallery listing and batch orchestration.

pub mod batch_service;
pub mod detection_service;
pub mod gallery_service;
pub mod identifier;
pub mod materializer;
pub mod upload_validator;
