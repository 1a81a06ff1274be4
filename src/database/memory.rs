use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{check_upsert_input, clamp_score, CollectionStatus, RetrievalResult, VectorStore};
use crate::chunking::DocumentChunk;
use crate::embeddings::{cosine_similarity, Embedding};
use crate::error::VectorStoreError;

#[derive(Debug, Default)]
struct Collection {
    dimension: u64,
    /// Points in first-insertion order; overwrites keep their slot
    points: Vec<(DocumentChunk, Embedding)>,
    index: HashMap<String, usize>,
}

/// In-process vector store with brute-force cosine search.
///
/// Used for local runs without a Qdrant server and by the test suites. Equal scores come
/// back in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, name: &str, dimension: u64) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.write().await;
        match collections.get(name) {
            Some(existing) if existing.dimension != dimension => {
                Err(VectorStoreError::DimensionMismatch {
                    collection: name.to_string(),
                    expected: dimension,
                    actual: existing.dimension,
                })
            }
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    Collection {
                        dimension,
                        ..Default::default()
                    },
                );
                Ok(())
            }
        }
    }

    async fn upsert(
        &self,
        name: &str,
        chunks: &[DocumentChunk],
        embeddings: &[Embedding],
    ) -> Result<usize, VectorStoreError> {
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| VectorStoreError::MissingCollection(name.to_string()))?;
        check_upsert_input(chunks, embeddings, Some(collection.dimension))?;

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let point = (chunk.clone(), embedding.clone());
            match collection.index.get(&chunk.id) {
                Some(&slot) => collection.points[slot] = point,
                None => {
                    collection
                        .index
                        .insert(chunk.id.clone(), collection.points.len());
                    collection.points.push(point);
                }
            }
        }
        Ok(chunks.len())
    }

    async fn search(
        &self,
        name: &str,
        query: &Embedding,
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievalResult>, VectorStoreError> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(name)
            .ok_or_else(|| VectorStoreError::MissingCollection(name.to_string()))?;

        let mut results: Vec<RetrievalResult> = collection
            .points
            .iter()
            .map(|(chunk, embedding)| RetrievalResult {
                chunk: chunk.clone(),
                score: clamp_score(cosine_similarity(&query.values, &embedding.values)),
            })
            .filter(|result| result.score >= score_threshold)
            .collect();

        // Stable, so ties keep insertion order
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }

    async fn clear(&self, name: &str) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.write().await;
        if let Some(collection) = collections.get_mut(name) {
            collection.points.clear();
            collection.index.clear();
        }
        Ok(())
    }

    async fn status(&self, name: &str) -> Result<CollectionStatus, VectorStoreError> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(name)
            .ok_or_else(|| VectorStoreError::MissingCollection(name.to_string()))?;
        Ok(CollectionStatus {
            point_count: collection.points.len() as u64,
            dimension: collection.dimension,
        })
    }

    async fn health(&self) -> bool {
        true
    }
}
