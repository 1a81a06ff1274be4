//! Single-turn and multi-turn question answering over the ingested corpus.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{GenerationSettings, RetrievalConfig};
use crate::context::{ContextAssembler, ContextBlock};
use crate::database::RetrievalResult;
use crate::error::{GenerationError, PipelineError, VectorStoreError};
use crate::generation::{GenerationClient, GenerationParams};
use crate::retriever::{Query, Retriever};
use crate::retry::RetryPolicy;

const EXCERPT_CHARS: usize = 200;

const BLOCKED_FALLBACK: &str = "I'm sorry, but I can't provide a response to that request. \
Please try rephrasing your question about personal finance.";

const NO_EVIDENCE_DECLINE: &str = "I'm sorry, but I couldn't find information about that in \
the financial documents I have access to. Please try asking about another financial topic.";

const NO_QUESTION_REPLY: &str =
    "I didn't receive a question. Please ask me something about financial literacy.";

/// Lifecycle of one query, logged as it advances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Received,
    Retrieving,
    Assembling,
    Generating,
    Answered,
    Degraded,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStage::Received => "received",
            QueryStage::Retrieving => "retrieving",
            QueryStage::Assembling => "assembling",
            QueryStage::Generating => "generating",
            QueryStage::Answered => "answered",
            QueryStage::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// How well an answer is grounded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AnswerStatus {
    /// Generated from retrieved evidence
    Answered,
    /// Generated, or declined, without evidence
    Degraded(String),
    /// The provider's safety filter suppressed the output; the text is a fallback
    Blocked,
}

/// A source chunk backing an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_filename: String,
    pub page_number: u32,
    pub score: f32,
    pub excerpt: String,
}

impl From<&RetrievalResult> for SourceRef {
    fn from(result: &RetrievalResult) -> Self {
        SourceRef {
            source_filename: result.chunk.source_filename.clone(),
            page_number: result.chunk.page_number,
            score: result.score,
            excerpt: excerpt(&result.chunk.text),
        }
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() > EXCERPT_CHARS {
        let head: String = text.chars().take(EXCERPT_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    /// Always present; empty when the answer is not grounded
    pub sources: Vec<SourceRef>,
    #[serde(flatten)]
    pub status: AnswerStatus,
    pub context_used: bool,
}

impl Answer {
    fn ungrounded(text: impl Into<String>, status: AnswerStatus) -> Self {
        Answer {
            text: text.into(),
            sources: Vec::new(),
            status,
            context_used: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a caller-held conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Health and settings of the query path
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub collection: String,
    pub point_count: Option<u64>,
    pub collection_dimension: Option<u64>,
    pub store_healthy: bool,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub generation_model: String,
    pub top_k: usize,
    pub score_threshold: f32,
}

/// Retrieval-augmented answering; holds no per-conversation state
pub struct RagPipeline {
    retriever: Retriever,
    assembler: ContextAssembler,
    generator: Arc<dyn GenerationClient>,
    retrieval: RetrievalConfig,
    generation: GenerationSettings,
    retry: RetryPolicy,
}

impl RagPipeline {
    pub fn new(
        retriever: Retriever,
        generator: Arc<dyn GenerationClient>,
        retrieval: RetrievalConfig,
        generation: GenerationSettings,
        retry: RetryPolicy,
    ) -> Self {
        RagPipeline {
            retriever,
            assembler: ContextAssembler::new(),
            generator,
            retrieval,
            generation,
            retry,
        }
    }

    /// Query with the configured defaults
    pub fn query(&self, text: impl Into<String>) -> Query {
        Query::new(text, &self.retrieval)
    }

    /// Answer a single question
    pub async fn answer(&self, query: &Query) -> Result<Answer, PipelineError> {
        self.respond(query, None, self.retrieval.max_context_chars)
            .await
    }

    /// Answer the latest user turn of a caller-supplied conversation.
    ///
    /// Only the latest user message drives retrieval; earlier turns are folded into the
    /// prompt as a transcript.
    pub async fn chat(
        &self,
        history: &[ChatMessage],
        language: &str,
    ) -> Result<Answer, PipelineError> {
        let Some(latest) = history.iter().rposition(|m| m.role == Role::User) else {
            return Ok(Answer::ungrounded(
                NO_QUESTION_REPLY,
                AnswerStatus::Degraded("no user question".to_string()),
            ));
        };

        let transcript = transcript(&history[..latest], self.retrieval.max_history_turns);
        let query = self
            .query(history[latest].content.clone())
            .with_language(language);
        self.respond(&query, transcript, self.retrieval.chat_context_chars)
            .await
    }

    /// Make sure the collection exists with the embedder's vector size.
    ///
    /// A wrong vector size is always fatal. An unreachable store or missing collection is
    /// tolerated when ungrounded answers are allowed, so requests run in degraded mode.
    pub async fn prepare(&self) -> Result<(), VectorStoreError> {
        let collection = self.retriever.collection();
        let dimension = self.retriever.embedder().dimension() as u64;
        let result = self
            .retriever
            .store()
            .ensure_collection(collection, dimension)
            .await;
        tolerate_unavailable(result, self.retrieval.allow_ungrounded)
    }

    pub async fn status(&self) -> PipelineStatus {
        let store = self.retriever.store();
        let collection = self.retriever.collection();
        let (point_count, collection_dimension) = match store.status(collection).await {
            Ok(status) => (Some(status.point_count), Some(status.dimension)),
            Err(e) => {
                warn!("Could not read status of {}: {}", collection, e);
                (None, None)
            }
        };

        PipelineStatus {
            collection: collection.to_string(),
            point_count,
            collection_dimension,
            store_healthy: store.health().await,
            embedding_model: self.retriever.embedder().model_name().to_string(),
            embedding_dimension: self.retriever.embedder().dimension(),
            generation_model: self.generator.model_name().to_string(),
            top_k: self.retrieval.top_k,
            score_threshold: self.retrieval.score_threshold,
        }
    }

    async fn respond(
        &self,
        query: &Query,
        transcript: Option<String>,
        max_chars: usize,
    ) -> Result<Answer, PipelineError> {
        stage(QueryStage::Received, &query.text);

        if query.text.trim().is_empty() {
            return Ok(Answer::ungrounded(
                NO_QUESTION_REPLY,
                AnswerStatus::Degraded("no user question".to_string()),
            ));
        }

        stage(QueryStage::Retrieving, &query.text);
        let results = match self.retriever.retrieve(query).await {
            Ok(results) => results,
            Err(e) if self.retrieval.allow_ungrounded => {
                warn!("Retrieval unavailable, answering without context: {}", e);
                return self
                    .generate_ungrounded(query, transcript.as_deref(), format!("{}", e))
                    .await;
            }
            Err(e) => return Err(e.into()),
        };

        stage(QueryStage::Assembling, &query.text);
        let block = self.assembler.assemble(&results, max_chars);
        if block.is_empty() {
            let reason = if results.is_empty() {
                "no results above score threshold"
            } else {
                "no result fits the context budget"
            };
            if !self.retrieval.allow_ungrounded {
                stage(QueryStage::Degraded, &query.text);
                return Ok(Answer::ungrounded(
                    NO_EVIDENCE_DECLINE,
                    AnswerStatus::Degraded(reason.to_string()),
                ));
            }
            return self
                .generate_ungrounded(query, transcript.as_deref(), reason.to_string())
                .await;
        }

        stage(QueryStage::Generating, &query.text);
        let prompt = grounded_prompt(query, transcript.as_deref());
        match self.generate(&prompt, &block.text).await {
            Ok(text) => {
                stage(QueryStage::Answered, &query.text);
                info!(
                    "Generated response with {} sources",
                    block.included.len()
                );
                Ok(grounded_answer(text, &block))
            }
            Err(GenerationError::Blocked { reason }) => {
                warn!("Answer blocked by safety filter: {}", reason);
                Ok(Answer::ungrounded(BLOCKED_FALLBACK, AnswerStatus::Blocked))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn generate_ungrounded(
        &self,
        query: &Query,
        transcript: Option<&str>,
        reason: String,
    ) -> Result<Answer, PipelineError> {
        stage(QueryStage::Generating, &query.text);
        let prompt = general_prompt(query, transcript);
        match self.generate(&prompt, "").await {
            Ok(text) => {
                stage(QueryStage::Degraded, &query.text);
                Ok(Answer::ungrounded(text, AnswerStatus::Degraded(reason)))
            }
            Err(GenerationError::Blocked { reason }) => {
                warn!("Answer blocked by safety filter: {}", reason);
                Ok(Answer::ungrounded(BLOCKED_FALLBACK, AnswerStatus::Blocked))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn generate(&self, prompt: &str, context: &str) -> Result<String, GenerationError> {
        let generator = &self.generator;
        let params = &GenerationParams::chat(&self.generation);
        self.retry
            .run("answer generation", move || async move {
                generator.generate(prompt, context, params).await
            })
            .await
    }
}

fn stage(stage: QueryStage, question: &str) {
    debug!("query {:?}: {}", question, stage);
}

fn grounded_answer(text: String, block: &ContextBlock) -> Answer {
    Answer {
        text,
        sources: block.included.iter().map(SourceRef::from).collect(),
        status: AnswerStatus::Answered,
        context_used: true,
    }
}

fn language_instruction(language: &str) -> String {
    if language.trim().is_empty() || language.eq_ignore_ascii_case("english") {
        String::new()
    } else {
        format!("Respond in {}.\n\n", language.trim())
    }
}

fn conversation(transcript: Option<&str>) -> String {
    transcript
        .map(|t| format!("Conversation so far:\n{}\n\n", t))
        .unwrap_or_default()
}

fn grounded_prompt(query: &Query, transcript: Option<&str>) -> String {
    format!(
        "{}You are a knowledgeable financial advisor. Based on the provided information, give a \
         clear and helpful answer.\n\n{}User Question: {}\n\nPlease provide a practical answer \
         that helps the user understand the topic. Use simple language and include specific \
         details when helpful.",
        language_instruction(&query.language),
        conversation(transcript),
        query.text.trim()
    )
}

fn general_prompt(query: &Query, transcript: Option<&str>) -> String {
    format!(
        "{}You are a knowledgeable financial advisor. Answer this question with clear, practical \
         advice.\n\n{}User Question: {}\n\nPlease provide a helpful answer using your knowledge \
         of finance and investments. Use simple language that anyone can understand.",
        language_instruction(&query.language),
        conversation(transcript),
        query.text.trim()
    )
}

/// Downgrade store outages to a warning when answers may be ungrounded
pub fn tolerate_unavailable(
    result: Result<(), VectorStoreError>,
    allow_ungrounded: bool,
) -> Result<(), VectorStoreError> {
    match result {
        Err(e @ (VectorStoreError::Unavailable(_) | VectorStoreError::MissingCollection(_)))
            if allow_ungrounded =>
        {
            warn!("{}; answering without document context", e);
            Ok(())
        }
        other => other,
    }
}

/// The last `max_turns` exchanges (a user message and its reply each) as prompt text
fn transcript(earlier: &[ChatMessage], max_turns: usize) -> Option<String> {
    let skip = earlier.len().saturating_sub(max_turns * 2);
    let lines: Vec<String> = earlier[skip..]
        .iter()
        .map(|m| match m.role {
            Role::User => format!("User: {}", m.content),
            Role::Assistant => format!("Assistant: {}", m.content),
        })
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_truncates_long_text() {
        assert_eq!(excerpt("short"), "short");
        let long = "é".repeat(250);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);
    }

    #[test]
    fn test_language_instruction_only_for_other_languages() {
        let config = RetrievalConfig::default();
        let english = Query::new("What is APR?", &config);
        let spanish = english.clone().with_language("Spanish");

        assert!(grounded_prompt(&english, None).starts_with("You are"));
        assert!(grounded_prompt(&spanish, None).starts_with("Respond in Spanish."));
    }

    #[test]
    fn test_transcript_is_folded_into_prompt() {
        let query = Query::new("And for a car loan?", &RetrievalConfig::default());
        let prompt = general_prompt(&query, Some("User: What is APR?\nAssistant: A yearly rate."));
        assert!(prompt.contains("Conversation so far:\nUser: What is APR?"));
        assert!(prompt.contains("User Question: And for a car loan?"));
    }

    #[test]
    fn test_transcript_keeps_whole_turns() {
        let history = vec![
            ChatMessage::user("What is APR?"),
            ChatMessage::assistant("A yearly rate."),
            ChatMessage::user("And APY?"),
            ChatMessage::assistant("It includes compounding."),
        ];

        let last_turn = transcript(&history, 1).unwrap();
        assert_eq!(last_turn, "User: And APY?\nAssistant: It includes compounding.");

        let both = transcript(&history, 2).unwrap();
        assert!(both.starts_with("User: What is APR?"));
        assert_eq!(both.lines().count(), 4);

        assert!(transcript(&[], 10).is_none());
        assert!(transcript(&history, 0).is_none());
    }

    #[test]
    fn test_store_outage_is_tolerated_only_with_fallback() {
        let outage = || Err(VectorStoreError::Unavailable("connection refused".into()));
        assert!(tolerate_unavailable(outage(), true).is_ok());
        assert!(matches!(
            tolerate_unavailable(outage(), false),
            Err(VectorStoreError::Unavailable(_))
        ));

        let missing = Err(VectorStoreError::MissingCollection("finance".into()));
        assert!(tolerate_unavailable(missing, true).is_ok());
    }

    #[test]
    fn test_dimension_mismatch_is_never_tolerated() {
        let mismatch = Err(VectorStoreError::DimensionMismatch {
            collection: "finance".into(),
            expected: 768,
            actual: 384,
        });
        assert!(matches!(
            tolerate_unavailable(mismatch, true),
            Err(VectorStoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_answer_status_serialization() {
        let answer = Answer::ungrounded(
            "text",
            AnswerStatus::Degraded("no results above score threshold".into()),
        );
        let value = serde_json::to_value(&answer).unwrap();
        assert_eq!(value["status"], "degraded");
        assert_eq!(value["reason"], "no results above score threshold");
        assert_eq!(value["sources"].as_array().unwrap().len(), 0);
    }
}
