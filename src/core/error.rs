//! Error types for mindvault.

use thiserror::Error;

use super::note::NoteId;

/// Result type alias using mindvault's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type.
///
/// Only [`Error::InvalidInput`], [`Error::InvalidOwner`] and
/// [`Error::Generation`] are expected to reach callers of the retrieval and
/// answer pipeline. Capability failures are absorbed by tier fallback.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed question, query or request field
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Owner identity could not be parsed or is nil
    #[error("Invalid owner identity: {0}")]
    InvalidOwner(String),

    /// Embedding, vector search or text search is absent or failing
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Answer generation failed (quota, auth, network, not configured)
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Note not found for this owner
    #[error("Note not found: {0}")]
    NoteNotFound(NoteId),

    /// Embedding vector is neither empty nor of the configured dimension
    #[error("Invalid embedding: expected 0 or {expected} dimensions, got {actual}")]
    InvalidEmbedding { expected: usize, actual: usize },

    /// Caller cancelled the operation before generation started
    #[error("Operation cancelled")]
    Cancelled,

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Background job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is part of the public failure contract of the
    /// retrieval/answer pipeline (input errors and generation failures).
    pub fn is_boundary(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::InvalidOwner(_) | Error::Generation(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_input() {
        let err = Error::InvalidInput("question is required".to_string());
        assert_eq!(err.to_string(), "Invalid input: question is required");
    }

    #[test]
    fn test_error_display_invalid_embedding() {
        let err = Error::InvalidEmbedding {
            expected: 768,
            actual: 12,
        };
        assert_eq!(
            err.to_string(),
            "Invalid embedding: expected 0 or 768 dimensions, got 12"
        );
    }

    #[test]
    fn test_boundary_errors() {
        assert!(Error::InvalidInput("x".into()).is_boundary());
        assert!(Error::Generation("quota".into()).is_boundary());
        assert!(!Error::CapabilityUnavailable("vector".into()).is_boundary());
        assert!(!Error::Cancelled.is_boundary());
    }
}
