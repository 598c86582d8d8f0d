//! Error types for the desk

use thiserror::Error;

/// Errors surfaced by every desk operation
#[derive(Error, Debug)]
pub enum DeskError {
    /// Malformed or missing input; the caller can fix the request
    #[error("Validation error: {0}")]
    Validation(String),

    /// A state or reference constraint blocks the operation
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeskError {
    /// Stable machine-readable kind used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            DeskError::Validation(_) => "VALIDATION",
            DeskError::Conflict(_) => "CONFLICT",
            DeskError::NotFound(_) => "NOT_FOUND",
            DeskError::Unauthorized(_) => "UNAUTHORIZED",
            DeskError::Config(_) => "CONFIG",
            DeskError::Io(_) => "IO",
            DeskError::Serialization(_) => "SERIALIZATION",
            DeskError::Internal(_) => "INTERNAL",
        }
    }
}

pub type Result<T> = std::result::Result<T, DeskError>;
