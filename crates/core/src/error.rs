use serde::Serialize;
use thiserror::Error;

use crate::models::DocumentStatus;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("pdf had no readable text")]
    EmptyText,

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid vector index: {0}")]
    InvalidIndex(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("invalid policy: {0}")]
    Policy(String),
}

/// A single schema violation, echoed back to HTTP callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{message}")]
    Validation {
        message: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("object {key} has an empty body")]
    EmptyObject { key: String },

    #[error("the response for {key} is not readable")]
    UnreadableObject { key: String },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("malformed object key: {0}")]
    MalformedKey(String),

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("document {0} does not exist")]
    DocumentNotFound(String),

    #[error("record {0} already exists")]
    AlreadyExists(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("model error: {0}")]
    Model(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn validation(message: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        Self::Validation {
            message: message.into(),
            issues,
        }
    }

    /// HTTP status class for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::DocumentNotFound(_) => 404,
            Self::AlreadyExists(_) => 409,
            _ => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }

    /// Machine-readable error code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "bad_request",
            Self::EmptyObject { .. } | Self::UnreadableObject { .. } => "upstream_empty",
            Self::MalformedRecord(_) => "malformed_data",
            Self::MalformedEvent(_) | Self::MalformedKey(_) => "malformed_event",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::DocumentNotFound(_) => "not_found",
            Self::AlreadyExists(_) => "conflict",
            _ => "internal",
        }
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            Self::Validation { issues, .. } => issues,
            _ => &[],
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
