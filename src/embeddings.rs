use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Embedding { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Converts text into fixed-dimension vectors.
///
/// Implementations must preserve input order and return exactly one vector per input.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError>;

    /// Length of every vector this client produces
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    async fn embed_one(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        match (vectors.pop(), vectors.is_empty()) {
            (Some(vector), true) => Ok(vector),
            _ => Err(EmbeddingError::InvalidResponse(
                "expected exactly one embedding".to_string(),
            )),
        }
    }
}

/// Cosine similarity of two vectors; zero when either has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Offline embedder based on feature hashing.
///
/// Every lowercased alphanumeric token is hashed (FNV-1a) into a bucket and the term
/// frequency vector is L2-normalized. The same text always maps to the same vector, which
/// makes it usable for local runs without a provider key and for deterministic tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        HashingEmbedder {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut values = vec![0.0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(&token.to_lowercase()) % self.dimension as u64) as usize;
            values[bucket] += 1.0;
        }

        let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|x| *x /= norm);
        }

        Embedding { values }
    }
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(0xcbf29ce484222325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl EmbeddingClient for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic_and_ordered() {
        let embedder = HashingEmbedder::new(64);
        let texts = vec![
            "Index funds track the market".to_string(),
            "Credit card interest compounds".to_string(),
        ];

        let first = embedder.embed(&texts).await.unwrap();
        let second = embedder.embed(&texts).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|e| e.dimension() == 64));
        assert_eq!(first[1], embedder.embed_text(&texts[1]));
    }

    #[tokio::test]
    async fn test_similar_texts_score_higher() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed_one("retirement savings account").await.unwrap();
        let close = embedder.embed_text("Open a retirement savings account early");
        let far = embedder.embed_text("Mortgage rates and home equity");

        assert!(
            cosine_similarity(&query.values, &close.values)
                > cosine_similarity(&query.values, &far.values)
        );
    }

    #[test]
    fn test_empty_text_yields_zero_vector() {
        let embedding = HashingEmbedder::new(8).embed_text("  ... ");
        assert!(embedding.values.iter().all(|v| *v == 0.0));
    }
}
