use futures::future::join_all;
use log::{debug, warn};
use std::sync::Arc;

use super::handout::{HandoutSection, SectionTemplate, HANDOUT_TEMPLATE};
use crate::error::GenerationError;
use crate::generation::{GenerationClient, GenerationParams};
use crate::retry::RetryPolicy;

/// Generates handout sections independently of each other
pub struct SectionWriter {
    generator: Arc<dyn GenerationClient>,
    params: GenerationParams,
    /// Attempts per section and the backoff between them
    attempts: RetryPolicy,
}

impl SectionWriter {
    pub fn new(
        generator: Arc<dyn GenerationClient>,
        params: GenerationParams,
        attempts: RetryPolicy,
    ) -> Self {
        SectionWriter {
            generator,
            params,
            attempts,
        }
    }

    /// Every template section, generated concurrently, in template order
    pub async fn write_all(&self, topic: &str, context: &str) -> Vec<HandoutSection> {
        join_all(
            HANDOUT_TEMPLATE
                .iter()
                .map(|template| self.write_section(topic, template, context)),
        )
        .await
    }

    /// Generate one section, retrying until it succeeds, is blocked, or attempts run out
    pub async fn write_section(
        &self,
        topic: &str,
        template: &SectionTemplate,
        context: &str,
    ) -> HandoutSection {
        let mut section = HandoutSection::pending(template);
        let prompt = section_prompt(topic, template);

        loop {
            section.attempts += 1;
            let error = match self.generator.generate(&prompt, context, &self.params).await {
                Ok(text) => {
                    let content = strip_heading(&text);
                    if !content.is_empty() {
                        debug!(
                            "Section {:?} generated with {} words",
                            template.name,
                            content.split_whitespace().count()
                        );
                        section.mark_generated(content);
                        return section;
                    }
                    GenerationError::InvalidResponse("empty section".to_string())
                }
                Err(e) => e,
            };

            let blocked = matches!(error, GenerationError::Blocked { .. });
            if blocked || section.attempts >= self.attempts.max_attempts {
                warn!(
                    "Section {:?} failed after {} attempts: {}",
                    template.name, section.attempts, error
                );
                section.mark_failed(error.to_string());
                return section;
            }

            let delay = self.attempts.backoff(section.attempts);
            warn!(
                "Section {:?} attempt {} failed: {}; retrying in {:?}",
                template.name, section.attempts, error, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn section_prompt(topic: &str, template: &SectionTemplate) -> String {
    let covers = template
        .covers
        .iter()
        .map(|point| format!("- {}", point))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a financial education specialist writing one section of an educational \
         handout about '{topic}'.\n\n\
         Write the section \"{name}\" in {min}-{max} words, covering:\n{covers}\n\n\
         Guidelines:\n\
         - Use clear, accessible language for a general audience and explain technical terms\n\
         - Ground the section in the context above; include specific numbers or dates when it provides them\n\
         - Use bullet points where they aid clarity and keep paragraphs to 3-5 sentences\n\
         - Do not repeat the section title and do not write other sections",
        topic = topic.trim(),
        name = template.name,
        min = template.min_words,
        max = template.max_words,
        covers = covers,
    )
}

/// Drop leading Markdown heading lines the model may add despite instructions
fn strip_heading(text: &str) -> String {
    text.trim()
        .lines()
        .skip_while(|line| line.trim_start().starts_with('#') || line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
