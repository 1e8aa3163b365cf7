use crate::{
    models::params::ParamsError,
    services::{batch_service::BatchError, gallery_service::GalleryError},
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Extra JSON merged into the body, e.g. upload notices.
    pub details: Option<Value>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let (Some(Value::Object(extra)), Some(map)) = (self.details, body.as_object_mut()) {
            map.extend(extra);
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<BatchError> for AppError {
    fn from(err: BatchError) -> Self {
        let message = err.to_string();
        match err {
            BatchError::EmptyBatch { notices } => {
                AppError::bad_request(message).with_details(json!({ "notices": notices }))
            }
            BatchError::InvalidParams(_) => AppError::bad_request(message),
        }
    }
}

impl From<ParamsError> for AppError {
    fn from(err: ParamsError) -> Self {
        BatchError::from(err).into()
    }
}

impl From<GalleryError> for AppError {
    fn from(err: GalleryError) -> Self {
        match err {
            GalleryError::InvalidPath(_) => AppError::bad_request(err.to_string()),
            GalleryError::NotFound(_) => AppError::not_found(err.to_string()),
            GalleryError::Io(io) => AppError::internal(io.to_string()),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}
