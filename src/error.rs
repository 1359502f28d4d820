//! Error taxonomy for the extraction pipeline.
//!
//! Request-construction errors reject a request before any engine runs.
//! Engine errors never escape the orchestrator; they become failure entries
//! in the aggregate result.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::schema::EngineKind;

/// Errors that reject a whole request before any adapter is invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("No input pages to process")]
    EmptyInput,

    #[error("No engines requested")]
    NoEngines,

    #[error("Unknown engine(s): {}", .names.join(", "))]
    UnknownEngine { names: Vec<String> },

    #[error("Engine '{name}' is a {declared} engine but was requested for the {requested} step")]
    EngineKindMismatch {
        name: String,
        declared: EngineKind,
        requested: EngineKind,
    },

    #[error("No text available for entity extraction: request an OCR engine or supply text")]
    MissingText,
}

/// Errors raised while building the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Engine '{0}' is already registered")]
    DuplicateEngine(String),
}

/// Category of an adapter-runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorKind {
    Unavailable,
    Timeout,
    MalformedResponse,
    UnsupportedLanguage,
    MissingInput,
    Processing,
    Internal,
}

impl EngineErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::MalformedResponse => "malformed_response",
            Self::UnsupportedLanguage => "unsupported_language",
            Self::MissingInput => "missing_input",
            Self::Processing => "processing",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure produced by one adapter invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{kind}: {message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Timeout, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::MalformedResponse, message)
    }

    pub fn unsupported_language(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::UnsupportedLanguage, message)
    }

    pub fn missing_input(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::MissingInput, message)
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Processing, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Internal, message)
    }

    /// Prefix the message with the page that failed, keeping the kind.
    pub fn on_page(self, page: usize) -> Self {
        Self {
            kind: self.kind,
            message: format!("page {}: {}", page + 1, self.message),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(e.to_string())
        } else if e.is_connect() {
            Self::unavailable(e.to_string())
        } else if e.is_decode() {
            Self::malformed(e.to_string())
        } else {
            Self::processing(e.to_string())
        }
    }
}

/// Errors surfaced by the HTTP API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Missing file in request")]
    MissingFile,

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to load input: {0}")]
    Load(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Request(RequestError::UnknownEngine { .. }) => {
                (StatusCode::BAD_REQUEST, "UNKNOWN_ENGINE")
            }
            ApiError::Request(RequestError::EngineKindMismatch { .. }) => {
                (StatusCode::BAD_REQUEST, "ENGINE_KIND_MISMATCH")
            }
            ApiError::Request(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::MissingFile => (StatusCode::BAD_REQUEST, "MISSING_FILE"),
            ApiError::UnsupportedFormat(_) => (StatusCode::BAD_REQUEST, "UNSUPPORTED_FORMAT"),
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::Load(_) => (StatusCode::UNPROCESSABLE_ENTITY, "LOAD_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}
