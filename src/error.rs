//! Error taxonomy shared by the ingestion, query and handout paths.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while splitting a document into chunks
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("document {0} contains no extractable text")]
    EmptyDocument(String),
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    InvalidOverlap { size: usize, overlap: usize },
}

/// Failures of the embedding provider
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding service error: {0}")]
    Service(String),
    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),
    #[error("embedding request rejected: {0}")]
    Rejected(String),
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// Failures of the text-generation provider
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The provider's safety filter suppressed the output
    #[error("generation blocked by safety filter: {reason}")]
    Blocked { reason: String },
    #[error("generation service error: {0}")]
    Service(String),
    #[error("generation request timed out after {0:?}")]
    Timeout(Duration),
    #[error("generation request rejected: {0}")]
    Rejected(String),
    #[error("invalid generation response: {0}")]
    InvalidResponse(String),
}

/// Failures of the vector store
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error(
        "collection {collection} has vector size {actual}, but the embedding model produces {expected}"
    )]
    DimensionMismatch {
        collection: String,
        expected: u64,
        actual: u64,
    },
    #[error("collection {0} does not exist")]
    MissingCollection(String),
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid vector store request: {0}")]
    InvalidInput(String),
}

/// Retrieval failed; distinct from "no relevant evidence", which is an empty result
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("retrieval unavailable: {0}")]
    Unavailable(#[from] VectorStoreError),
}

/// Failures of the external search collaborator
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search provider is not configured: {0}")]
    NotConfigured(String),
    #[error("search service error: {0}")]
    Service(String),
    #[error("search timed out after {0:?}")]
    Timeout(Duration),
}

/// Per-document ingestion failure; the batch continues past it
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported document format {mime_type} for {path}")]
    UnsupportedFormat { path: String, mime_type: String },
    #[error("failed to extract text from {path}: {reason}")]
    Extraction { path: String, reason: String },
    #[error(transparent)]
    Chunking(#[from] ChunkError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] VectorStoreError),
}

/// Failures of a single query or chat request
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Fatal failures of the handout pipeline
#[derive(Debug, Error)]
pub enum HandoutError {
    #[error("content extraction failed: {0}")]
    Extraction(#[from] RetrievalError),
    #[error("no grounding material found for topic {0:?}")]
    NoGrounding(String),
    #[error("failed to write handout to {path}: {source}")]
    Output {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
