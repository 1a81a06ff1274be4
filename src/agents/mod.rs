//! Three-stage handout pipeline: knowledge-base extraction, optional web search
//! augmentation, and per-section generation, followed by an optional quality review.

use chrono::Local;
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::config::HandoutConfig;
use crate::context::ContextBlock;
use crate::error::HandoutError;
use crate::search::SearchHit;

pub mod assessor;
pub mod extractor;
pub mod handout;
pub mod search_agent;
pub mod writer;

pub use assessor::{QualityAssessment, QualityAssessor, QualityReview};
pub use extractor::ContentExtractor;
pub use handout::{Handout, HandoutMetrics, HandoutSection, SectionStatus};
pub use search_agent::{SearchAgent, SearchDepth};
pub use writer::SectionWriter;

/// Budget for web material in the section context
const WEB_CONTEXT_CHARS: usize = 1500;

/// Stages of one handout request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Extracting,
    Searching,
    Generating,
    Assessing,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Extracting => "extracting",
            PipelineStage::Searching => "searching",
            PipelineStage::Generating => "generating",
            PipelineStage::Assessing => "assessing",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What the web search stage contributed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum SearchAugmentation {
    Disabled,
    Available(Vec<SearchHit>),
    /// The stage failed or timed out; generation went ahead without it
    Unavailable(String),
}

impl SearchAugmentation {
    pub fn label(&self) -> &'static str {
        match self {
            SearchAugmentation::Disabled => "disabled",
            SearchAugmentation::Available(_) => "available",
            SearchAugmentation::Unavailable(_) => "unavailable",
        }
    }

    pub fn hits(&self) -> &[SearchHit] {
        match self {
            SearchAugmentation::Available(hits) => hits,
            _ => &[],
        }
    }
}

/// Per-request overrides of the configured search behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoutOptions {
    pub search_enabled: bool,
    pub search_depth: SearchDepth,
    pub quality_review: bool,
}

impl From<&HandoutConfig> for HandoutOptions {
    fn from(config: &HandoutConfig) -> Self {
        HandoutOptions {
            search_enabled: config.search_enabled,
            search_depth: config.search_depth,
            quality_review: config.quality_review,
        }
    }
}

/// Result of a handout request
#[derive(Debug, Clone, Serialize)]
pub struct HandoutOutcome {
    pub handout: Handout,
    pub augmentation: SearchAugmentation,
    pub review: QualityReview,
    /// Stages the request passed through, in order
    pub stages: Vec<PipelineStage>,
    pub output_path: Option<PathBuf>,
}

impl HandoutOutcome {
    pub fn failed_sections(&self) -> Vec<&str> {
        self.handout.failed_sections()
    }

    pub fn to_markdown(&self) -> String {
        self.handout.to_markdown(&self.augmentation, &self.review)
    }
}

pub struct HandoutPipeline {
    extractor: ContentExtractor,
    search: Option<SearchAgent>,
    writer: SectionWriter,
    assessor: Option<QualityAssessor>,
    output_dir: PathBuf,
}

impl HandoutPipeline {
    /// `search` is `None` when no provider is configured
    pub fn new(
        extractor: ContentExtractor,
        search: Option<SearchAgent>,
        writer: SectionWriter,
        config: &HandoutConfig,
    ) -> Self {
        HandoutPipeline {
            extractor,
            search,
            writer,
            assessor: None,
            output_dir: config.output_dir.clone(),
        }
    }

    /// Review finished handouts when the request asks for it
    pub fn with_assessor(mut self, assessor: QualityAssessor) -> Self {
        self.assessor = Some(assessor);
        self
    }

    /// Produce a handout for `topic` without writing it anywhere.
    ///
    /// Extraction and search run concurrently. Only extraction can fail the request;
    /// search problems, failed sections and review problems are reported in the outcome.
    pub async fn run(
        &self,
        topic: &str,
        options: HandoutOptions,
    ) -> Result<HandoutOutcome, HandoutError> {
        let mut stages = vec![PipelineStage::Extracting];
        if options.search_enabled {
            stages.push(PipelineStage::Searching);
        }
        info!("Generating handout for {:?}", topic);

        let (extracted, augmentation) =
            tokio::join!(self.extractor.extract(topic), self.augment(topic, options));

        let block = match extracted {
            Ok(block) => block,
            Err(e) => {
                warn!("Handout for {:?} {}: {}", topic, PipelineStage::Failed, e);
                return Err(e);
            }
        };

        stages.push(PipelineStage::Generating);
        debug!("Handout for {:?}: {}", topic, PipelineStage::Generating);
        let context = section_context(&block, augmentation.hits());
        let sections = self.writer.write_all(topic, &context).await;

        let handout = Handout {
            topic: topic.trim().to_string(),
            generated_at: Local::now(),
            sections,
            sources: block.attributions.clone(),
            web_references: augmentation.hits().to_vec(),
        };

        let failed = handout.failed_sections();
        if failed.is_empty() {
            info!("Handout for {:?} complete", topic);
        } else {
            warn!(
                "Handout for {:?} completed with failed sections: {}",
                topic,
                failed.join(", ")
            );
        }

        let review = if options.quality_review {
            stages.push(PipelineStage::Assessing);
            debug!("Handout for {:?}: {}", topic, PipelineStage::Assessing);
            self.review(&handout, &augmentation).await
        } else {
            QualityReview::Disabled
        };
        stages.push(PipelineStage::Done);

        Ok(HandoutOutcome {
            handout,
            augmentation,
            review,
            stages,
            output_path: None,
        })
    }

    /// Run the pipeline and write the Markdown handout into the output directory
    pub async fn generate(
        &self,
        topic: &str,
        options: HandoutOptions,
    ) -> Result<HandoutOutcome, HandoutError> {
        let mut outcome = self.run(topic, options).await?;
        let path = handout::write_handout(
            &self.output_dir,
            &outcome.handout,
            &outcome.augmentation,
            &outcome.review,
        )?;
        info!("Handout written to {}", path.display());
        outcome.output_path = Some(path);
        Ok(outcome)
    }

    async fn review(&self, handout: &Handout, augmentation: &SearchAugmentation) -> QualityReview {
        let Some(assessor) = &self.assessor else {
            warn!("Quality review requested but no assessor is configured");
            return QualityReview::Unavailable("quality assessor not configured".to_string());
        };
        let markdown = handout.to_markdown(augmentation, &QualityReview::Disabled);
        assessor.review(handout, &markdown).await
    }

    async fn augment(&self, topic: &str, options: HandoutOptions) -> SearchAugmentation {
        if !options.search_enabled {
            return SearchAugmentation::Disabled;
        }
        let Some(agent) = &self.search else {
            warn!("Search augmentation requested but no search provider is configured");
            return SearchAugmentation::Unavailable("search provider not configured".to_string());
        };

        match agent.gather(topic, options.search_depth).await {
            Ok(hits) => {
                info!("Search augmentation found {} results", hits.len());
                SearchAugmentation::Available(hits)
            }
            Err(e) => {
                warn!("Search augmentation unavailable, continuing without it: {}", e);
                SearchAugmentation::Unavailable(e.to_string())
            }
        }
    }
}

/// Knowledge-base context followed by a bounded digest of web results
fn section_context(block: &ContextBlock, hits: &[SearchHit]) -> String {
    let mut context = format!("KNOWLEDGE BASE CONTENT:\n{}", block.text);
    if hits.is_empty() {
        return context;
    }

    context.push_str("\n\nLATEST INFORMATION & NEWS:");
    let mut used = 0;
    for hit in hits {
        let entry = format!("\n- {}: {}", hit.title, hit.snippet);
        let cost = entry.chars().count();
        if used + cost > WEB_CONTEXT_CHARS {
            break;
        }
        context.push_str(&entry);
        used += cost;
    }
    context
}
