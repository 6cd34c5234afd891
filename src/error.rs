//! Error types for the retrieval and evaluation pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur while indexing, answering or evaluating.
#[derive(Error, Debug)]
pub enum RagError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The corpus directory does not exist or is not a directory.
    #[error("Corpus path '{0}' does not exist or is not a directory")]
    InvalidCorpusPath(PathBuf),

    /// No documents found in the corpus.
    #[error("No documents found in corpus at '{0}'")]
    EmptyCorpus(PathBuf),

    /// The index directory does not contain a saved index.
    #[error("Index not found at '{0}'")]
    IndexNotFound(PathBuf),

    /// Saved index artifacts disagree with each other.
    #[error("Index at '{path}' is inconsistent: {message}")]
    IndexMismatch { path: PathBuf, message: String },

    /// Embedding width does not match the index dimension.
    #[error("Embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Invalid configuration (chunking parameters, batch shapes, ...).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed manifest content.
    #[error("Failed to read manifest '{path}': {message}")]
    Manifest { path: PathBuf, message: String },

    /// The API rejected the request because of rate limiting (HTTP 429).
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The request timed out.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The connection to the API could not be established.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// LLM API returned a non-success status.
    #[error("LLM API error ({status}): {message}")]
    LlmApi { status: u16, message: String },

    /// LLM response parsing error.
    #[error("Failed to parse LLM response: {0}")]
    LlmParse(String),

    /// HTTP request error that is neither a timeout nor a connect failure.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Embedding capability failure.
    #[error("Embedding error: {0}")]
    Embedding(String),
}

impl RagError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a failed completion call is transient and worth retrying.
    ///
    /// Rate limits, timeouts, connection failures and 5xx responses are
    /// retryable. Everything else, including 4xx other than 429, is fatal.
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::RateLimited(_) | RagError::Timeout(_) | RagError::Connection(_) => true,
            RagError::LlmApi { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RagError::Timeout(err.to_string())
        } else if err.is_connect() {
            RagError::Connection(err.to_string())
        } else {
            RagError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::LlmParse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RagError::RateLimited("slow down".into()).is_retryable());
        assert!(RagError::Timeout("30s".into()).is_retryable());
        assert!(RagError::Connection("refused".into()).is_retryable());
        assert!(
            RagError::LlmApi {
                status: 503,
                message: "unavailable".into()
            }
            .is_retryable()
        );
        assert!(
            RagError::LlmApi {
                status: 429,
                message: "too many".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(
            !RagError::LlmApi {
                status: 401,
                message: "bad key".into()
            }
            .is_retryable()
        );
        assert!(
            !RagError::LlmApi {
                status: 400,
                message: "bad request".into()
            }
            .is_retryable()
        );
        assert!(!RagError::LlmParse("not json".into()).is_retryable());
        assert!(!RagError::Http("builder".into()).is_retryable());
    }
}
