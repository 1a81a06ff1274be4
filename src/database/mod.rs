//! Vector store capability and its implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunking::DocumentChunk;
use crate::embeddings::Embedding;
use crate::error::VectorStoreError;

pub mod memory;
pub mod qdrant;

pub use memory::MemoryStore;
pub use qdrant::{QdrantConfig, QdrantStore};

/// A chunk scored against a query vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk: DocumentChunk,
    /// Similarity in `[0, 1]`
    pub score: f32,
}

/// Point count and vector size of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStatus {
    pub point_count: u64,
    pub dimension: u64,
}

/// Upsert and similarity search over named collections
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection when absent; an existing one must have `dimension`
    async fn ensure_collection(&self, name: &str, dimension: u64) -> Result<(), VectorStoreError>;

    /// Insert or overwrite points keyed by chunk id; returns the number written
    async fn upsert(
        &self,
        name: &str,
        chunks: &[DocumentChunk],
        embeddings: &[Embedding],
    ) -> Result<usize, VectorStoreError>;

    /// At most `top_k` results scoring at least `score_threshold`, best first
    async fn search(
        &self,
        name: &str,
        query: &Embedding,
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievalResult>, VectorStoreError>;

    /// Remove every point from the collection
    async fn clear(&self, name: &str) -> Result<(), VectorStoreError>;

    async fn status(&self, name: &str) -> Result<CollectionStatus, VectorStoreError>;

    async fn health(&self) -> bool;
}

/// Reject upserts whose chunk and vector lists cannot be paired
pub(crate) fn check_upsert_input(
    chunks: &[DocumentChunk],
    embeddings: &[Embedding],
    dimension: Option<u64>,
) -> Result<(), VectorStoreError> {
    if chunks.len() != embeddings.len() {
        return Err(VectorStoreError::InvalidInput(format!(
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        )));
    }
    if let Some(dimension) = dimension {
        if let Some(bad) = embeddings
            .iter()
            .find(|e| e.dimension() as u64 != dimension)
        {
            return Err(VectorStoreError::InvalidInput(format!(
                "vector of size {} in a collection of size {}",
                bad.dimension(),
                dimension
            )));
        }
    }
    Ok(())
}

/// Map cosine similarity onto `[0, 1]`
pub(crate) fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
