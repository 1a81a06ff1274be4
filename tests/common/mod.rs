#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use finrag::chunking::Chunker;
use finrag::config::{ChunkingConfig, GenerationSettings, HandoutConfig, RetrievalConfig};
use finrag::chunking::DocumentChunk;
use finrag::database::{CollectionStatus, MemoryStore, RetrievalResult, VectorStore};
use finrag::document::Document;
use finrag::embeddings::{Embedding, EmbeddingClient, HashingEmbedder};
use finrag::error::{GenerationError, SearchError, VectorStoreError};
use finrag::generation::{GenerationClient, GenerationParams};
use finrag::ingest::Ingestor;
use finrag::rag::RagPipeline;
use finrag::retriever::Retriever;
use finrag::retry::RetryPolicy;
use finrag::search::{SearchHit, SearchProvider};

pub const DIMENSION: usize = 256;
pub const COLLECTION: &str = "financial_documents";

pub fn corpus() -> Vec<Document> {
    vec![
        Document::from_pages(
            "saving.pdf",
            vec![
                "Emergency fund basics. An emergency fund covers surprises. Build the emergency \
                 fund first and keep the emergency fund in a savings account."
                    .to_string(),
            ],
        ),
        Document::from_pages(
            "credit.pdf",
            vec![
                "Credit scores summarize repayment history. Paying credit card balances on \
                 time raises credit scores."
                    .to_string(),
            ],
        ),
        Document::from_pages(
            "investing.pdf",
            vec![
                "Index funds hold every stock of an index. Index funds have low fees.".to_string(),
            ],
        ),
    ]
}

pub fn retrieval_config() -> RetrievalConfig {
    RetrievalConfig {
        collection: COLLECTION.to_string(),
        ..RetrievalConfig::default()
    }
}

pub fn embedder() -> Arc<dyn EmbeddingClient> {
    Arc::new(HashingEmbedder::new(DIMENSION))
}

pub fn ingestor(store: Arc<dyn VectorStore>) -> Ingestor {
    let chunker = Chunker::new(ChunkingConfig {
        chunk_size: 400,
        chunk_overlap: 50,
        boundary_window: 40,
    })
    .unwrap();
    Ingestor::new(chunker, embedder(), store, COLLECTION, RetryPolicy::none())
}

/// A memory store holding the sample corpus
pub async fn seeded_store() -> Arc<dyn VectorStore> {
    let store: Arc<dyn VectorStore> = Arc::new(MemoryStore::new());
    let ingestor = ingestor(store.clone());
    for document in corpus() {
        ingestor.ingest_document(&document).await.unwrap();
    }
    store
}

pub fn retriever(store: Arc<dyn VectorStore>, config: &RetrievalConfig) -> Retriever {
    Retriever::new(embedder(), store, config, RetryPolicy::none())
}

pub fn rag(
    store: Arc<dyn VectorStore>,
    generator: Arc<ScriptedGenerator>,
    config: RetrievalConfig,
) -> RagPipeline {
    RagPipeline::new(
        retriever(store, &config),
        generator,
        config,
        GenerationSettings::default(),
        RetryPolicy::new(2, Duration::from_millis(1)),
    )
}

pub fn handout_config(dir: &std::path::Path) -> HandoutConfig {
    HandoutConfig {
        search_timeout: Duration::from_millis(50),
        output_dir: dir.to_path_buf(),
        ..HandoutConfig::default()
    }
}

type Script = dyn Fn(&str) -> Result<String, GenerationError> + Send + Sync;

/// Generation double that answers from a script and records every call
pub struct ScriptedGenerator {
    script: Box<Script>,
    pub calls: Mutex<Vec<(String, String, GenerationParams)>>,
}

impl ScriptedGenerator {
    pub fn new(
        script: impl Fn(&str) -> Result<String, GenerationError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(ScriptedGenerator {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(text: &'static str) -> Arc<Self> {
        ScriptedGenerator::new(move |_| Ok(text.to_string()))
    }

    pub fn calls(&self) -> Vec<(String, String, GenerationParams)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        context: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), context.to_string(), *params));
        (self.script)(prompt)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Search double returning fixed hits after an optional delay
pub struct ScriptedSearch {
    pub delay: Duration,
    pub hits: Vec<SearchHit>,
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, SearchError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.hits.clone())
    }
}

pub fn news_hit() -> SearchHit {
    SearchHit {
        title: "Savers shift to high-yield accounts".to_string(),
        snippet: "More households are parking their emergency fund in high-yield savings accounts this year."
            .to_string(),
        link: "https://news.example/high-yield".to_string(),
        date: Some("Mar 2, 2025".to_string()),
    }
}

/// Store double for a vector database that cannot be reached
pub struct OfflineStore;

fn offline() -> VectorStoreError {
    VectorStoreError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl VectorStore for OfflineStore {
    async fn ensure_collection(&self, _name: &str, _dimension: u64) -> Result<(), VectorStoreError> {
        Err(offline())
    }

    async fn upsert(
        &self,
        _name: &str,
        _chunks: &[DocumentChunk],
        _embeddings: &[Embedding],
    ) -> Result<usize, VectorStoreError> {
        Err(offline())
    }

    async fn search(
        &self,
        _name: &str,
        _query: &Embedding,
        _top_k: usize,
        _score_threshold: f32,
    ) -> Result<Vec<RetrievalResult>, VectorStoreError> {
        Err(offline())
    }

    async fn clear(&self, _name: &str) -> Result<(), VectorStoreError> {
        Err(offline())
    }

    async fn status(&self, _name: &str) -> Result<CollectionStatus, VectorStoreError> {
        Err(offline())
    }

    async fn health(&self) -> bool {
        false
    }
}
