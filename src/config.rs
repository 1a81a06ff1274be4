//! Explicit configuration passed into each component at construction.
//!
//! Everything is read from the environment (after `dotenv`) exactly once, in the binary,
//! and handed down as plain structs. Library components never consult the environment.

use anyhow::{anyhow, ensure, Result};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::agents::search_agent::SearchDepth;
use crate::database::qdrant::QdrantConfig;
use crate::gemini::GeminiConfig;
use crate::generation::SafetyLevel;
use crate::retry::RetryPolicy;
use crate::search::SearchConfig;

/// Read `key` from the environment, falling back to `default` when unset or blank
pub(crate) fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(env_opt(key)?.unwrap_or(default))
}

/// Read an optional, typed value from the environment
pub(crate) fn env_opt<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid value for {}: {:?} ({})", key, raw, e)),
        _ => Ok(None),
    }
}

/// Chunk geometry, in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// How far back from the target end a natural break may be searched for
    pub boundary_window: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            chunk_size: 1000,
            chunk_overlap: 200,
            boundary_window: 100,
        }
    }
}

impl ChunkingConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = ChunkingConfig::default();
        Ok(ChunkingConfig {
            chunk_size: env_or("CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: env_or("CHUNK_OVERLAP", defaults.chunk_overlap)?,
            boundary_window: env_or("CHUNK_BOUNDARY_WINDOW", defaults.boundary_window)?,
        })
    }
}

/// Retrieval and context-budget settings for the query path
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    pub collection: String,
    pub top_k: usize,
    pub score_threshold: f32,
    /// Cap on results from one source file; `None` keeps every result
    pub max_results_per_source: Option<usize>,
    pub max_context_chars: usize,
    pub chat_context_chars: usize,
    /// Answer from general knowledge when no evidence is available
    pub allow_ungrounded: bool,
    pub max_history_turns: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            collection: "financial_documents".to_string(),
            top_k: 5,
            score_threshold: 0.3,
            max_results_per_source: None,
            max_context_chars: 2000,
            chat_context_chars: 1500,
            allow_ungrounded: true,
            max_history_turns: 10,
        }
    }
}

impl RetrievalConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = RetrievalConfig::default();
        Ok(RetrievalConfig {
            collection: env_or("QDRANT_COLLECTION", defaults.collection)?,
            top_k: env_or("TOP_K_RESULTS", defaults.top_k)?,
            score_threshold: env_or("SCORE_THRESHOLD", defaults.score_threshold)?,
            max_results_per_source: env_opt("MAX_RESULTS_PER_SOURCE")?,
            max_context_chars: env_or("MAX_CONTEXT_CHARS", defaults.max_context_chars)?,
            chat_context_chars: env_or("CHAT_CONTEXT_CHARS", defaults.chat_context_chars)?,
            allow_ungrounded: env_or("ALLOW_UNGROUNDED_ANSWERS", defaults.allow_ungrounded)?,
            max_history_turns: env_or("MAX_HISTORY_TURNS", defaults.max_history_turns)?,
        })
    }
}

/// Sampling, token and safety settings per use case
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub handout_temperature: f32,
    pub chat_max_tokens: u32,
    pub handout_section_max_tokens: u32,
    pub chat_safety: SafetyLevel,
    pub handout_safety: SafetyLevel,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        GenerationSettings {
            temperature: 0.1,
            handout_temperature: 0.4,
            chat_max_tokens: 1024,
            handout_section_max_tokens: 2048,
            chat_safety: SafetyLevel::Strict,
            handout_safety: SafetyLevel::Permissive,
        }
    }
}

impl GenerationSettings {
    pub fn from_env() -> Result<Self> {
        let defaults = GenerationSettings::default();
        Ok(GenerationSettings {
            temperature: env_or("TEMPERATURE", defaults.temperature)?,
            handout_temperature: env_or("HANDOUT_TEMPERATURE", defaults.handout_temperature)?,
            chat_max_tokens: env_or("CHAT_MAX_TOKENS", defaults.chat_max_tokens)?,
            handout_section_max_tokens: env_or(
                "HANDOUT_SECTION_MAX_TOKENS",
                defaults.handout_section_max_tokens,
            )?,
            chat_safety: env_or("CHAT_SAFETY", defaults.chat_safety)?,
            handout_safety: env_or("HANDOUT_SAFETY", defaults.handout_safety)?,
        })
    }
}

/// Settings of the three-stage handout pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct HandoutConfig {
    pub search_enabled: bool,
    pub search_depth: SearchDepth,
    pub search_timeout: Duration,
    pub max_section_attempts: usize,
    pub context_chars: usize,
    pub output_dir: PathBuf,
    /// Score finished handouts with one extra generation call
    pub quality_review: bool,
}

impl Default for HandoutConfig {
    fn default() -> Self {
        HandoutConfig {
            search_enabled: false,
            search_depth: SearchDepth::Standard,
            search_timeout: Duration::from_secs(20),
            max_section_attempts: 3,
            context_chars: 4000,
            output_dir: PathBuf::from("Handout"),
            quality_review: true,
        }
    }
}

impl HandoutConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = HandoutConfig::default();
        Ok(HandoutConfig {
            search_enabled: env_or("SEARCH_ENABLED", defaults.search_enabled)?,
            search_depth: env_or("SEARCH_DEPTH", defaults.search_depth)?,
            search_timeout: Duration::from_secs(env_or(
                "SEARCH_TIMEOUT_SECS",
                defaults.search_timeout.as_secs(),
            )?),
            max_section_attempts: env_or("MAX_SECTION_ATTEMPTS", defaults.max_section_attempts)?,
            context_chars: env_or("HANDOUT_CONTEXT_CHARS", defaults.context_chars)?,
            output_dir: env_or("HANDOUT_DIR", defaults.output_dir)?,
            quality_review: env_or("QUALITY_REVIEW", defaults.quality_review)?,
        })
    }
}

/// The complete configuration surface
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub qdrant: QdrantConfig,
    pub gemini: GeminiConfig,
    pub search: SearchConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationSettings,
    pub handout: HandoutConfig,
    pub retry: RetryPolicy,
    pub data_dir: PathBuf,
}

impl AppConfig {
    /// Create the configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let retry = RetryPolicy::new(
            env_or("MAX_RETRIES", 3)?,
            Duration::from_millis(env_or("RETRY_BASE_DELAY_MS", 500)?),
        );

        let config = AppConfig {
            qdrant: QdrantConfig::from_env()?,
            gemini: GeminiConfig::from_env()?,
            search: SearchConfig::from_env()?,
            chunking: ChunkingConfig::from_env()?,
            retrieval: RetrievalConfig::from_env()?,
            generation: GenerationSettings::from_env()?,
            handout: HandoutConfig::from_env()?,
            retry,
            data_dir: env_or("DATA_DIR", PathBuf::from("Data"))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations no component can work with
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        ensure!(chunking.chunk_size > 0, "CHUNK_SIZE must be positive");
        ensure!(
            chunking.chunk_overlap < chunking.chunk_size,
            "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
            chunking.chunk_overlap,
            chunking.chunk_size
        );
        ensure!(self.retrieval.top_k > 0, "TOP_K_RESULTS must be positive");
        ensure!(
            (0.0..=1.0).contains(&self.retrieval.score_threshold),
            "SCORE_THRESHOLD must be within [0, 1]"
        );
        ensure!(
            self.retrieval.max_results_per_source != Some(0),
            "MAX_RESULTS_PER_SOURCE must be positive when set"
        );
        ensure!(
            self.handout.max_section_attempts > 0,
            "MAX_SECTION_ATTEMPTS must be positive"
        );
        ensure!(
            self.gemini.embedding_dimension > 0,
            "EMBEDDING_DIMENSION must be positive"
        );
        Ok(())
    }
}
