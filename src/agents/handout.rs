//! Handout document model, Markdown rendering and output files.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use super::{QualityReview, SearchAugmentation};
use crate::error::HandoutError;
use crate::search::SearchHit;

/// A fixed section of every handout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionTemplate {
    pub name: &'static str,
    pub min_words: usize,
    pub max_words: usize,
    /// Points the section is expected to cover
    pub covers: &'static [&'static str],
}

pub const HANDOUT_TEMPLATE: [SectionTemplate; 5] = [
    SectionTemplate {
        name: "Introduction & Overview",
        min_words: 180,
        max_words: 200,
        covers: &[
            "a clear definition and explanation of the topic",
            "why the topic matters for financial literacy",
            "what readers will learn from this handout",
            "current relevance, drawing on recent news when available",
        ],
    },
    SectionTemplate {
        name: "Key Concepts & Fundamentals",
        min_words: 250,
        max_words: 280,
        covers: &[
            "essential terminology and definitions",
            "core principles and how it works",
            "common types or categories, if applicable",
            "the basic mechanics explained simply",
        ],
    },
    SectionTemplate {
        name: "Practical Applications & Examples",
        min_words: 250,
        max_words: 280,
        covers: &[
            "real-world use cases and scenarios",
            "specific examples that illustrate the concepts",
            "who benefits and how",
            "a step-by-step example if applicable",
        ],
    },
    SectionTemplate {
        name: "Important Considerations & Best Practices",
        min_words: 200,
        max_words: 220,
        covers: &[
            "key factors to consider",
            "potential risks and limitations",
            "common mistakes to avoid",
            "when to seek professional advice",
        ],
    },
    SectionTemplate {
        name: "Getting Started & Resources",
        min_words: 150,
        max_words: 170,
        covers: &[
            "actionable next steps for readers",
            "recommended resources for learning more",
            "professional organizations or certifications",
            "where to get help or guidance",
        ],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionStatus {
    Pending,
    Generated,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandoutSection {
    pub name: String,
    pub target_word_range: (usize, usize),
    pub content: String,
    pub status: SectionStatus,
    pub attempts: usize,
    /// Last error, for failed sections
    pub failure: Option<String>,
}

impl HandoutSection {
    pub fn pending(template: &SectionTemplate) -> Self {
        HandoutSection {
            name: template.name.to_string(),
            target_word_range: (template.min_words, template.max_words),
            content: String::new(),
            status: SectionStatus::Pending,
            attempts: 0,
            failure: None,
        }
    }

    pub fn mark_generated(&mut self, content: String) {
        self.content = content;
        self.status = SectionStatus::Generated;
        self.failure = None;
    }

    pub fn mark_failed(&mut self, reason: String) {
        self.content.clear();
        self.status = SectionStatus::Failed;
        self.failure = Some(reason);
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readability {
    High,
    Medium,
    Low,
}

impl fmt::Display for Readability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readability::High => write!(f, "high"),
            Readability::Medium => write!(f, "medium"),
            Readability::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HandoutMetrics {
    pub word_count: usize,
    pub section_count: usize,
    pub bullet_points: usize,
    pub readability: Readability,
}

/// A generated educational handout
#[derive(Debug, Clone, Serialize)]
pub struct Handout {
    pub topic: String,
    pub generated_at: DateTime<Local>,
    pub sections: Vec<HandoutSection>,
    /// Knowledge-base files the handout is grounded on
    pub sources: Vec<String>,
    pub web_references: Vec<SearchHit>,
}

impl Handout {
    /// Complete only when every section was generated
    pub fn is_complete(&self) -> bool {
        self.sections
            .iter()
            .all(|section| section.status == SectionStatus::Generated)
    }

    pub fn failed_sections(&self) -> Vec<&str> {
        self.sections
            .iter()
            .filter(|section| section.status == SectionStatus::Failed)
            .map(|section| section.name.as_str())
            .collect()
    }

    pub fn metrics(&self) -> HandoutMetrics {
        let generated: Vec<&HandoutSection> = self
            .sections
            .iter()
            .filter(|section| section.status == SectionStatus::Generated)
            .collect();

        let word_count = generated.iter().map(|section| section.word_count()).sum();
        let bullet_points = generated
            .iter()
            .flat_map(|section| section.content.lines())
            .filter(|line| {
                let line = line.trim_start();
                line.starts_with("- ") || line.starts_with("* ") || line.starts_with("• ")
            })
            .count();
        let sentences = generated
            .iter()
            .flat_map(|section| section.content.chars())
            .filter(|c| matches!(c, '.' | '!' | '?'))
            .count()
            .max(1);

        let words_per_sentence = word_count as f64 / sentences as f64;
        let readability = if words_per_sentence < 15.0 {
            Readability::High
        } else if words_per_sentence < 25.0 {
            Readability::Medium
        } else {
            Readability::Low
        };

        HandoutMetrics {
            word_count,
            section_count: generated.len(),
            bullet_points,
            readability,
        }
    }

    /// `<topic-slug>_<YYYYMMDD_HHMMSS>_handout.md`
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_handout.md",
            topic_slug(&self.topic),
            self.generated_at.format("%Y%m%d_%H%M%S")
        )
    }

    pub fn to_markdown(
        &self,
        augmentation: &SearchAugmentation,
        review: &QualityReview,
    ) -> String {
        let mut out = format!(
            "# {} - Financial Education Handout\n\n",
            title_case(&self.topic)
        );
        out.push_str(&format!(
            "*Generated: {}*  \n*search_augmentation: {}*\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S"),
            augmentation.label()
        ));

        for (number, section) in self.sections.iter().enumerate() {
            out.push_str(&format!("\n## {}. {}\n\n", number + 1, section.name));
            match section.status {
                SectionStatus::Generated => {
                    out.push_str(section.content.trim());
                    out.push('\n');
                }
                SectionStatus::Failed => out.push_str(&format!(
                    "> **Section failed:** this section could not be generated after {} attempts ({}).\n",
                    section.attempts,
                    section.failure.as_deref().unwrap_or("unknown error")
                )),
                SectionStatus::Pending => out.push_str("> **Section pending.**\n"),
            }
        }

        if !self.sources.is_empty() {
            out.push_str("\n## Sources\n\n");
            for source in &self.sources {
                out.push_str(&format!("- {}\n", source));
            }
        }

        if !self.web_references.is_empty() {
            out.push_str("\n## Further Reading\n\n");
            for hit in &self.web_references {
                match &hit.date {
                    Some(date) => out.push_str(&format!("- [{}]({}) ({})\n", hit.title, hit.link, date)),
                    None => out.push_str(&format!("- [{}]({})\n", hit.title, hit.link)),
                }
            }
        }

        if let Some(assessment) = review.assessment() {
            out.push_str(&format!(
                "\n## Quality Review\n\n**Overall score:** {:.1}/10\n",
                assessment.score
            ));
            if let Some(readiness) = &assessment.readiness {
                out.push_str(&format!("**Readiness:** {}\n", readiness));
            }
            for (heading, items) in [
                ("Strengths", &assessment.strengths),
                ("Priority improvements", &assessment.improvements),
            ] {
                if !items.is_empty() {
                    out.push_str(&format!("\n**{}**\n\n", heading));
                    for item in items {
                        out.push_str(&format!("- {}\n", item));
                    }
                }
            }
        }

        out
    }
}

/// Write the rendered handout into `dir`, creating the directory when needed
pub fn write_handout(
    dir: &Path,
    handout: &Handout,
    augmentation: &SearchAugmentation,
    review: &QualityReview,
) -> Result<PathBuf, HandoutError> {
    let output_error = |path: &Path| {
        let path = path.display().to_string();
        move |source| HandoutError::Output { path, source }
    };

    fs::create_dir_all(dir).map_err(output_error(dir))?;
    let path = dir.join(handout.file_name());
    fs::write(&path, handout.to_markdown(augmentation, review)).map_err(output_error(&path))?;
    Ok(path)
}

/// Lowercase, underscore-separated file-name form of a topic
pub fn topic_slug(topic: &str) -> String {
    let slug = topic
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if slug.is_empty() {
        "handout".to_string()
    } else {
        slug
    }
}

fn title_case(topic: &str) -> String {
    topic
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
