use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Failures raised by the gateway services.
///
/// Collaborator errors (SQLite, disk, JSON) are wrapped transparently and
/// surfaced unchanged; nothing in the services downgrades an error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("bucket `{0}` not found")]
    NoSuchBucket(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("upload `{0}` not found")]
    NoSuchUpload(String),
    #[error("stored key `{0}` does not encode a part number")]
    MalformedKey(String),
    #[error("digest mismatch: declared `{declared}`, computed `{computed}`")]
    IntegrityMismatch { declared: String, computed: String },
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("access denied")]
    AccessDenied,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// S3-style error code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::NoSuchBucket(_) => "NoSuchBucket",
            Self::BucketAlreadyExists(_) => "BucketAlreadyExists",
            Self::InvalidBucketName { .. } => "InvalidBucketName",
            Self::InvalidObjectKey => "KeyTooLongOrInvalid",
            Self::NoSuchUpload(_) => "NoSuchUpload",
            Self::MalformedKey(_) => "InternalError",
            Self::IntegrityMismatch { .. } => "BadDigest",
            Self::MalformedMetadata(_) => "MalformedPOSTRequest",
            Self::BackendUnavailable(_) => "ServiceUnavailable",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::AccessDenied => "AccessDenied",
            Self::Sqlx(_) | Self::Io(_) | Self::Json(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_)
            | Self::InvalidBucketName { .. }
            | Self::InvalidObjectKey
            | Self::IntegrityMismatch { .. }
            | Self::MalformedMetadata(_) => StatusCode::BAD_REQUEST,
            Self::NoSuchBucket(_) | Self::NoSuchUpload(_) => StatusCode::NOT_FOUND,
            Self::BucketAlreadyExists(_) => StatusCode::CONFLICT,
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::MalformedKey(_) | Self::Sqlx(_) | Self::Io(_) | Self::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// A lightweight wrapper for errors crossing the HTTP boundary.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "code": self.code,
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::new(err.status(), err.code(), err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
