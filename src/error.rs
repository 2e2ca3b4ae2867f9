//! Error taxonomy shared by the loader, embedder, store, and retrieval stages.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the ingestion and query paths.
#[derive(Debug, Error)]
pub enum RagError {
    /// The document extension is not one the loader understands.
    #[error("unsupported document format {extension:?} for {path:?}")]
    UnsupportedFormat {
        /// Offending document path.
        path: PathBuf,
        /// Lowercased extension (empty when the file has none).
        extension: String,
    },
    /// The document could not be opened or read.
    #[error("failed to read {path:?}: {source}")]
    ReadFailure {
        /// Document path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Text extraction from a binary format failed.
    #[error("failed to extract text from {path:?}: {message}")]
    Extraction {
        /// Document path.
        path: PathBuf,
        /// Extractor error message.
        message: String,
    },
    /// The embedding provider rejected or failed a request.
    #[error("embedding provider error: {message}")]
    EmbeddingProvider {
        /// Provider response or transport error.
        message: String,
        /// True when retrying the same request may succeed.
        transient: bool,
    },
    /// An embedding did not have the dimensionality the index expects.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality fixed by the index.
        expected: usize,
        /// Dimensionality of the offending vector.
        actual: usize,
    },
    /// The backing store failed to read or write chunks.
    #[error("storage failure: {0}")]
    Storage(String),
    /// Caller supplied an invalid configuration or request.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A chunk record failed validation at the storage boundary.
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),
    /// An operation exceeded its request-scoped deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: &'static str,
        /// Deadline that elapsed.
        after: Duration,
    },
}

impl RagError {
    /// Builds a provider error that is worth retrying.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::EmbeddingProvider {
            message: message.into(),
            transient: true,
        }
    }

    /// Builds a provider error that must not be retried.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::EmbeddingProvider {
            message: message.into(),
            transient: false,
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::EmbeddingProvider { transient, .. } => *transient,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

impl From<tokio_postgres::Error> for RagError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Convenience alias used throughout the library.
pub type RagResult<T> = Result<T, RagError>;
