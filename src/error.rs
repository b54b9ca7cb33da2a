// Service error taxonomy and its HTTP mapping
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The caller left out required input.
    #[error("{0}")]
    BadRequest(String),

    /// Anything that went wrong while loading, decoding, running or encoding.
    #[error("{0}")]
    Processing(String),

    #[error("Insufficient disk space for model storage")]
    InsufficientStorage {
        path: PathBuf,
        available_mb: u64,
        required_mb: u64,
    },

    #[error("No available ports found in range {start}-{end}")]
    NoPortAvailable { start: u16, end: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn processing(err: impl std::fmt::Display) -> Self {
        Self::Processing(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = self.to_string();
        HttpResponse::build(self.status_code()).json(ErrorBody { error: &message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_is_client_error() {
        let err = ServiceError::BadRequest("No image provided".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "No image provided");
    }

    #[test]
    fn storage_and_processing_are_server_errors() {
        let storage = ServiceError::InsufficientStorage {
            path: PathBuf::from("/models"),
            available_mb: 10,
            required_mb: 500,
        };
        assert_eq!(storage.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(storage.to_string(), "Insufficient disk space for model storage");

        let processing = ServiceError::processing("cannot decode");
        assert_eq!(processing.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(processing.error_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
