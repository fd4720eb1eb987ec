//! Error types for the `docrag` crate.

use thiserror::Error;

/// Errors that can occur in the ingestion pipeline and retrieval engine.
#[derive(Debug, Error)]
pub enum RagError {
    /// The uploaded bytes could not be turned into usable text.
    ///
    /// Terminal for the owning document: retrying without new input will
    /// fail the same way.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Chunking produced a degenerate result (no parent chunks). Terminal.
    #[error("Chunking error: {0}")]
    Chunking(String),

    /// An error occurred during embedding generation. Retryable by
    /// re-running the document's processing.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A vision call failed while describing an embedded image.
    ///
    /// Fails the whole document (fail-fast) so the stored chunk set never
    /// reflects partial image annotation.
    #[error("Image description error: {0}")]
    ImageDescription(String),

    /// An error occurred in the chunk/document storage backend. Retryable.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An error occurred in the opaque content store (upload/download).
    #[error("Content store error: {0}")]
    ContentStore(String),

    /// A query-time retrieval failure. Surfaced to the caller; never
    /// converted into an empty result set.
    #[error("Search error: {0}")]
    Search(String),

    /// An error occurred during result reranking.
    #[error("Reranker error ({reranker}): {message}")]
    Rerank {
        /// The reranker that produced the error.
        reranker: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An error in pipeline orchestration (unknown document, bad state
    /// transition, task join failure).
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

/// A convenience result type for pipeline and retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;
