use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::database::{RetrievalResult, VectorStore};
use crate::embeddings::EmbeddingClient;
use crate::error::RetrievalError;
use crate::retry::RetryPolicy;

/// Over-fetch factor used when a per-source cap may discard results
const CAPPED_FETCH_FACTOR: usize = 3;

/// One retrieval request
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub text: String,
    pub top_k: usize,
    pub score_threshold: f32,
    pub language: String,
}

impl Query {
    /// Query with the configured top-k and threshold, answered in English
    pub fn new(text: impl Into<String>, config: &RetrievalConfig) -> Self {
        Query {
            text: text.into(),
            top_k: config.top_k,
            score_threshold: config.score_threshold,
            language: "English".to_string(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_threshold(mut self, score_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

/// Embeds queries and ranks stored chunks against them
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    collection: String,
    max_per_source: Option<usize>,
    retry: RetryPolicy,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        config: &RetrievalConfig,
        retry: RetryPolicy,
    ) -> Self {
        Retriever {
            embedder,
            store,
            collection: config.collection.clone(),
            max_per_source: config.max_results_per_source,
            retry,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingClient> {
        &self.embedder
    }

    /// Ranked results for `query`, best first, all at or above its threshold.
    ///
    /// An empty list means nothing relevant was found; failures to embed or search are
    /// errors so callers can tell the two apart.
    pub async fn retrieve(&self, query: &Query) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if query.top_k == 0 || query.text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let embedder = &self.embedder;
        let text = query.text.as_str();
        let vector = self
            .retry
            .run("query embedding", move || async move {
                embedder.embed_one(text).await
            })
            .await?;

        let fetch = match self.max_per_source {
            Some(_) => query.top_k.saturating_mul(CAPPED_FETCH_FACTOR),
            None => query.top_k,
        };

        let store = &self.store;
        let collection = self.collection.as_str();
        let vector = &vector;
        let threshold = query.score_threshold;
        let candidates = self
            .retry
            .run("vector search", move || async move {
                store.search(collection, vector, fetch, threshold).await
            })
            .await?;

        let results = rank(candidates, query, self.max_per_source);
        debug!(
            "Retrieved {} results for {:?} (threshold {})",
            results.len(),
            query.text,
            query.score_threshold
        );
        Ok(results)
    }
}

/// Enforce the threshold, order by score, cap per source and truncate to `top_k`
fn rank(
    mut candidates: Vec<RetrievalResult>,
    query: &Query,
    max_per_source: Option<usize>,
) -> Vec<RetrievalResult> {
    candidates.retain(|result| result.score >= query.score_threshold);
    // Stable, so equal scores keep store order
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    if let Some(cap) = max_per_source {
        let mut per_source: HashMap<String, usize> = HashMap::new();
        candidates.retain(|result| {
            let seen = per_source
                .entry(result.chunk.source_filename.clone())
                .or_insert(0);
            *seen += 1;
            *seen <= cap
        });
    }

    candidates.truncate(query.top_k);
    candidates
}
