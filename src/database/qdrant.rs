use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use qdrant_client::qdrant::{
    vectors_config, CollectionInfo, CreateCollectionBuilder, DeletePointsBuilder, Distance,
    Filter, PointStruct, ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, Value,
    VectorParams,
};
use qdrant_client::{Qdrant, QdrantError};
use serde_json::json;
use std::collections::HashMap;
use std::env;

use super::{check_upsert_input, clamp_score, CollectionStatus, RetrievalResult, VectorStore};
use crate::chunking::DocumentChunk;
use crate::embeddings::Embedding;
use crate::error::VectorStoreError;

/// Configuration for Qdrant
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
}

impl QdrantConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let url = env::var("QDRANT_URL")?;
        let api_key = env::var("QDRANT_API_KEY").ok().filter(|k| !k.is_empty());

        Ok(QdrantConfig { url, api_key })
    }
}

/// Vector store backed by a Qdrant server
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    /// Create a new Qdrant client
    pub fn new(config: QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder.build()?;

        Ok(QdrantStore { client })
    }

    /// Collection details, or `None` when the collection does not exist
    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>, VectorStoreError> {
        match self.client.collection_info(name).await {
            Ok(response) => Ok(response.result),
            Err(QdrantError::ResponseError { status })
                if status.code() == tonic::Code::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(unavailable(e)),
        }
    }
}

fn unavailable(err: QdrantError) -> VectorStoreError {
    match err {
        QdrantError::ResponseError { status } if status.code() == tonic::Code::NotFound => {
            VectorStoreError::MissingCollection(status.message().to_string())
        }
        other => VectorStoreError::Unavailable(other.to_string()),
    }
}

/// Vector size of a single-vector collection
fn collection_dimension(info: &CollectionInfo) -> Option<u64> {
    let config = info.config.as_ref()?.params.as_ref()?.vectors_config.as_ref()?;
    match config.config.as_ref()? {
        vectors_config::Config::Params(params) => Some(params.size),
        vectors_config::Config::ParamsMap(_) => None,
    }
}

/// Existing collections must use a single unnamed vector of the configured size
fn check_dimension(
    name: &str,
    info: &CollectionInfo,
    expected: u64,
) -> Result<(), VectorStoreError> {
    match collection_dimension(info) {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(VectorStoreError::DimensionMismatch {
            collection: name.to_string(),
            expected,
            actual: actual.unwrap_or(0),
        }),
    }
}

fn to_point(chunk: &DocumentChunk, embedding: &Embedding) -> Result<PointStruct, VectorStoreError> {
    let payload: HashMap<String, Value> = serde_json::from_value(json!({
        "text": chunk.text,
        "source_filename": chunk.source_filename,
        "page_number": chunk.page_number,
        "chunk_index": chunk.chunk_index,
        "char_start": chunk.char_start,
        "char_end": chunk.char_end,
    }))
    .map_err(|e| VectorStoreError::InvalidInput(e.to_string()))?;

    Ok(PointStruct::new(
        chunk.id.clone(),
        embedding.values.clone(),
        payload,
    ))
}

/// Rebuild a chunk from a scored point; points missing text or source are skipped
fn from_scored_point(point: ScoredPoint) -> Option<RetrievalResult> {
    let payload = point.payload;
    let integer = |key: &str| payload.get(key).and_then(|v| v.as_integer()).unwrap_or(0);

    let text = payload.get("text")?.as_str()?.to_string();
    let source_filename = payload.get("source_filename")?.as_str()?.to_string();
    let id = point
        .id
        .and_then(|id| id.point_id_options)
        .map(|id| match id {
            qdrant_client::qdrant::point_id::PointIdOptions::Uuid(uuid) => uuid,
            qdrant_client::qdrant::point_id::PointIdOptions::Num(num) => num.to_string(),
        })
        .unwrap_or_default();

    Some(RetrievalResult {
        chunk: DocumentChunk {
            id,
            text,
            source_filename,
            page_number: integer("page_number") as u32,
            chunk_index: integer("chunk_index") as usize,
            char_start: integer("char_start") as usize,
            char_end: integer("char_end") as usize,
        },
        score: clamp_score(point.score),
    })
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, name: &str, dimension: u64) -> Result<(), VectorStoreError> {
        if let Some(info) = self.collection_info(name).await? {
            return check_dimension(name, &info, dimension);
        }

        info!("Creating collection {} with vector size {}", name, dimension);
        let create_collection = CreateCollectionBuilder::new(name).vectors_config(VectorParams {
            size: dimension,
            distance: Distance::Cosine.into(),
            ..Default::default()
        });

        self.client
            .create_collection(create_collection)
            .await
            .map_err(unavailable)?;

        Ok(())
    }

    async fn upsert(
        &self,
        name: &str,
        chunks: &[DocumentChunk],
        embeddings: &[Embedding],
    ) -> Result<usize, VectorStoreError> {
        check_upsert_input(chunks, embeddings, None)?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let points = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| to_point(chunk, embedding))
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Upserting {} points into {}", points.len(), name);
        self.client
            .upsert_points(UpsertPointsBuilder::new(name, points).wait(true))
            .await
            .map_err(unavailable)?;

        Ok(chunks.len())
    }

    async fn search(
        &self,
        name: &str,
        query: &Embedding,
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievalResult>, VectorStoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let search_request = SearchPointsBuilder::new(name, query.values.clone(), top_k as u64)
            .score_threshold(score_threshold)
            .with_payload(true);

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .map_err(unavailable)?;

        // Qdrant already orders by score; clamping keeps that order intact
        Ok(search_response
            .result
            .into_iter()
            .filter_map(from_scored_point)
            .filter(|result| result.score >= score_threshold)
            .collect())
    }

    async fn clear(&self, name: &str) -> Result<(), VectorStoreError> {
        info!("Clearing all points from {}", name);
        self.client
            .delete_points(
                DeletePointsBuilder::new(name)
                    .points(Filter::default())
                    .wait(true),
            )
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn status(&self, name: &str) -> Result<CollectionStatus, VectorStoreError> {
        let info = self
            .collection_info(name)
            .await?
            .ok_or_else(|| VectorStoreError::MissingCollection(name.to_string()))?;

        Ok(CollectionStatus {
            point_count: info.points_count.unwrap_or(0),
            dimension: collection_dimension(&info).unwrap_or(0),
        })
    }

    async fn health(&self) -> bool {
        self.client.health_check().await.is_ok()
    }
}
