use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chunking::Chunker;
use crate::database::VectorStore;
use crate::document::{list_documents, Document};
use crate::embeddings::EmbeddingClient;
use crate::error::{IngestionError, VectorStoreError};
use crate::retry::RetryPolicy;

/// Outcome of one ingestion batch
#[derive(Debug, Default, Serialize)]
pub struct IngestionReport {
    pub files_processed: usize,
    pub chunks_stored: usize,
    /// Files that were skipped, with the reason
    pub failures: Vec<(String, String)>,
}

/// Turns source documents into stored, embedded chunks.
///
/// Writes are serialized: a clear followed by re-ingestion never interleaves with another
/// batch started through the same `Ingestor`.
pub struct Ingestor {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    collection: String,
    retry: RetryPolicy,
    write_lock: Mutex<()>,
}

impl Ingestor {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Ingestor {
            chunker,
            embedder,
            store,
            collection: collection.into(),
            retry,
            write_lock: Mutex::new(()),
        }
    }

    /// Create the collection, failing when its vector size differs from the embedder's
    pub async fn prepare(&self) -> Result<(), VectorStoreError> {
        self.store
            .ensure_collection(&self.collection, self.embedder.dimension() as u64)
            .await
    }

    /// Ingest every supported file of `dir`, optionally clearing the collection first.
    ///
    /// A file that fails is recorded in the report and the batch moves on.
    pub async fn ingest_directory(
        &self,
        dir: &Path,
        clear: bool,
    ) -> Result<IngestionReport, IngestionError> {
        let paths = list_documents(dir)?;
        info!("Found {} documents in {}", paths.len(), dir.display());

        let _guard = self.write_lock.lock().await;
        self.prepare().await?;
        if clear {
            self.store.clear(&self.collection).await?;
        }

        let mut report = IngestionReport::default();
        for path in paths {
            let name = path.display().to_string();
            match self.ingest_path(path).await {
                Ok(stored) => {
                    info!("Stored {} chunks from {}", stored, name);
                    report.files_processed += 1;
                    report.chunks_stored += stored;
                }
                Err(e) => {
                    warn!("Skipping {}: {}", name, e);
                    report.failures.push((name, e.to_string()));
                }
            }
        }

        info!(
            "Ingestion finished: {} files, {} chunks, {} failures",
            report.files_processed,
            report.chunks_stored,
            report.failures.len()
        );
        Ok(report)
    }

    /// Ingest a single in-memory document; returns the number of chunks stored
    pub async fn ingest_document(&self, document: &Document) -> Result<usize, IngestionError> {
        let _guard = self.write_lock.lock().await;
        self.prepare().await?;
        self.store_document(document).await
    }

    async fn ingest_path(&self, path: PathBuf) -> Result<usize, IngestionError> {
        // PDF extraction is CPU-bound
        let document = extract_blocking(path, |path| Document::from_file(path)).await?;
        self.store_document(&document).await
    }

    async fn store_document(&self, document: &Document) -> Result<usize, IngestionError> {
        let chunks = self.chunker.chunk_document(document)?;
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();

        let embedder = &self.embedder;
        let texts = &texts;
        let embeddings = self
            .retry
            .run("chunk embedding", move || async move {
                embedder.embed(texts).await
            })
            .await?;

        let store = &self.store;
        let collection = self.collection.as_str();
        let (chunks, embeddings) = (&chunks, &embeddings);
        let stored = self
            .retry
            .run("chunk upsert", move || async move {
                store.upsert(collection, chunks, embeddings).await
            })
            .await?;
        Ok(stored)
    }
}

/// Run a document extractor off the async runtime; a panicking extractor is reported
/// against the file it was reading
async fn extract_blocking<F>(path: PathBuf, extract: F) -> Result<Document, IngestionError>
where
    F: FnOnce(&Path) -> Result<Document, IngestionError> + Send + 'static,
{
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || extract(&path))
        .await
        .map_err(|e| IngestionError::Extraction {
            path: display,
            reason: e.to_string(),
        })?
}
