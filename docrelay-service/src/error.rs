use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::response::Status;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Intake(#[from] IntakeError),

    #[error("PDF processing failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Upload intake rejections
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("No file selected")]
    NoFileSelected,

    #[error("Invalid file type. Please upload a PDF file.")]
    InvalidFileType { filename: String },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    /// The request body hit the transport limit before the file was read
    #[error("File too large (max {max} bytes)")]
    RequestTooLarge { max: u64 },

    #[error("Invalid PDF file format")]
    InvalidPdf,

    #[error("Failed to store upload at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Extraction orchestrator errors
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Missing extraction credentials: {message}")]
    AuthConfiguration { message: String },

    #[error("PDF file not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("Extraction job failed: {message}")]
    RemoteJob { message: String },

    #[error("{context}: {source}")]
    Request {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("Malformed extraction archive: {message}")]
    ArchiveParse { message: String },

    #[error("Failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Storage uploader errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Dropbox authentication failed: {message}")]
    AuthConfiguration { message: String },

    #[error("Failed to connect to Dropbox: {0}")]
    Connection(#[source] crate::storage::DropboxError),

    #[error("Folder not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("Path is not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("Transfer of {path} failed: {source}")]
    Transfer {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Intake(IntakeError::InvalidFileType { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ServiceError::Intake(
                IntakeError::FileTooLarge { .. } | IntakeError::RequestTooLarge { .. },
            ) => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Intake(IntakeError::Io { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Intake(_) | ServiceError::InvalidRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Extraction(
                ExtractionError::RemoteJob { .. }
                | ExtractionError::Request { .. }
                | ExtractionError::ArchiveParse { .. },
            ) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Intake(IntakeError::NoFileSelected) => "no_file_selected",
            ServiceError::Intake(IntakeError::InvalidFileType { .. }) => "invalid_file_type",
            ServiceError::Intake(
                IntakeError::FileTooLarge { .. } | IntakeError::RequestTooLarge { .. },
            ) => "file_too_large",
            ServiceError::Intake(IntakeError::InvalidPdf) => "invalid_pdf",
            ServiceError::Intake(IntakeError::Io { .. }) => "io_error",
            ServiceError::Extraction(ExtractionError::AuthConfiguration { .. }) => "config_error",
            ServiceError::Extraction(ExtractionError::SourceNotFound { .. }) => "source_not_found",
            ServiceError::Extraction(ExtractionError::RemoteJob { .. })
            | ServiceError::Extraction(ExtractionError::Request { .. }) => "extraction_failed",
            ServiceError::Extraction(ExtractionError::ArchiveParse { .. }) => "archive_error",
            ServiceError::Extraction(ExtractionError::Io { .. }) => "io_error",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        let response = ErrorResponse {
            status: Status::Error,
            message: self.to_string(),
            code: Some(code),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
