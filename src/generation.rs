use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::GenerationSettings;
use crate::error::GenerationError;

/// How aggressively the provider should filter output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    /// Block content with medium or higher harm probability
    Strict,
    /// Block only high harm probability
    Permissive,
}

impl FromStr for SafetyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(SafetyLevel::Strict),
            "permissive" => Ok(SafetyLevel::Permissive),
            other => Err(format!("unknown safety level {:?}", other)),
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyLevel::Strict => write!(f, "strict"),
            SafetyLevel::Permissive => write!(f, "permissive"),
        }
    }
}

/// Sampling, budget and safety parameters of one generation call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub max_output_tokens: u32,
    pub safety: SafetyLevel,
}

impl GenerationParams {
    /// Preset for chat answers: tight token budget, strict filtering
    pub fn chat(settings: &GenerationSettings) -> Self {
        GenerationParams {
            temperature: settings.temperature,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: settings.chat_max_tokens,
            safety: settings.chat_safety,
        }
    }

    /// Preset for handout quality reviews: low temperature, chat-sized budget
    pub fn quality_review(settings: &GenerationSettings) -> Self {
        GenerationParams {
            temperature: settings.temperature,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: settings.chat_max_tokens,
            safety: settings.handout_safety,
        }
    }

    /// Preset for handout sections: larger budget, permissive filtering
    pub fn handout_section(settings: &GenerationSettings) -> Self {
        GenerationParams {
            temperature: settings.handout_temperature,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: settings.handout_section_max_tokens,
            safety: settings.handout_safety,
        }
    }
}

/// Text generation from a prompt plus supporting context
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate text; `context` may be empty when answering without evidence
    async fn generate(
        &self,
        prompt: &str,
        context: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError>;

    fn model_name(&self) -> &str;
}
