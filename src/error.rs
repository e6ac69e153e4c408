//! Error types for the nutrition tracker

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Error, Debug)]
pub enum TrackerError {

    // =============================
    // Extraction Boundary Errors
    // =============================

    /// Remote channel is unconfigured or unreachable.
    /// Absorbed by the orchestrator, never surfaced to callers.
    #[error("Extraction service unavailable: {0}")]
    RemoteUnavailable(String),

    /// Remote replied, but the payload does not honour the contract.
    #[error("Malformed extraction response: {0}")]
    MalformedResponse(String),

    #[error("Could not parse input: {0}")]
    ParseFailed(String),

    // =============================
    // Caller-facing Errors
    // =============================

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Record not found: {0}")]
    RecordNotFound(Uuid),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TrackerError {
    /// True for failures that belong to the remote boundary and must be
    /// answered with the rule-based fallback.
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            TrackerError::RemoteUnavailable(_)
                | TrackerError::MalformedResponse(_)
                | TrackerError::HttpError(_)
                | TrackerError::SerializationError(_)
        )
    }
}
