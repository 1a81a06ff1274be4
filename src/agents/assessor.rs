use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;

use super::handout::Handout;
use crate::error::GenerationError;
use crate::generation::{GenerationClient, GenerationParams};

/// Handout text the reviewer sees
const REVIEW_CHARS: usize = 4000;

/// Reviewer verdict on a finished handout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityAssessment {
    /// Overall score out of 10
    pub score: f32,
    pub readiness: Option<String>,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
}

/// What the quality review stage contributed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum QualityReview {
    Disabled,
    Assessed(QualityAssessment),
    /// The reviewer failed or answered in an unreadable form; the handout stands as is
    Unavailable(String),
}

impl QualityReview {
    pub fn label(&self) -> &'static str {
        match self {
            QualityReview::Disabled => "disabled",
            QualityReview::Assessed(_) => "assessed",
            QualityReview::Unavailable(_) => "unavailable",
        }
    }

    pub fn assessment(&self) -> Option<&QualityAssessment> {
        match self {
            QualityReview::Assessed(assessment) => Some(assessment),
            _ => None,
        }
    }
}

/// Scores a rendered handout with one generation call
pub struct QualityAssessor {
    generator: Arc<dyn GenerationClient>,
    params: GenerationParams,
}

impl QualityAssessor {
    pub fn new(generator: Arc<dyn GenerationClient>, params: GenerationParams) -> Self {
        QualityAssessor { generator, params }
    }

    /// Review `handout`; every failure is reported as `Unavailable`
    pub async fn review(&self, handout: &Handout, markdown: &str) -> QualityReview {
        let metrics = handout.metrics();
        if metrics.section_count == 0 {
            return QualityReview::Unavailable("no generated sections to assess".to_string());
        }

        let prompt = review_prompt(&handout.topic, metrics.word_count, metrics.section_count);
        let content: String = markdown.chars().take(REVIEW_CHARS).collect();

        let reply = match self.generator.generate(&prompt, &content, &self.params).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Quality review unavailable: {}", e);
                return QualityReview::Unavailable(e.to_string());
            }
        };

        match parse_assessment(&reply) {
            Ok(assessment) => {
                debug!(
                    "Handout for {:?} scored {:.1}/10",
                    handout.topic, assessment.score
                );
                QualityReview::Assessed(assessment)
            }
            Err(e) => {
                warn!("Quality review unavailable: {}", e);
                QualityReview::Unavailable(e.to_string())
            }
        }
    }
}

fn review_prompt(topic: &str, word_count: usize, section_count: usize) -> String {
    format!(
        "You are an editor assessing an educational financial-literacy handout about \
         '{topic}' ({word_count} words, {section_count} sections). The handout text is \
         given above.\n\n\
         Judge accuracy, structure, practical value, coverage and presentation, then reply \
         in exactly this form:\n\n\
         Overall Quality Score: <number from 1 to 10>/10\n\
         Readiness Level: <Ready for Use | Needs Minor Improvements | Requires Major Revisions>\n\
         Key Strengths:\n\
         - <strength>\n\
         Priority Improvements:\n\
         - <improvement>\n\n\
         List 3-5 strengths and 3-5 improvements.",
        topic = topic.trim(),
    )
}

#[derive(Clone, Copy, PartialEq)]
enum List {
    None,
    Strengths,
    Improvements,
}

/// Read the reviewer's reply; the score line is required, everything else is optional
fn parse_assessment(reply: &str) -> Result<QualityAssessment, GenerationError> {
    let mut score = None;
    let mut readiness = None;
    let mut strengths = Vec::new();
    let mut improvements = Vec::new();
    let mut list = List::None;

    for line in reply.lines() {
        let line = line.trim().trim_matches('*').trim();
        if let Some(rest) = after_label(line, "Overall Quality Score:") {
            score = parse_score(rest);
            list = List::None;
        } else if let Some(rest) = after_label(line, "Readiness Level:") {
            readiness = Some(rest.to_string()).filter(|r| !r.is_empty());
            list = List::None;
        } else if let Some(rest) = after_label(line, "Key Strengths:") {
            list = List::Strengths;
            strengths.extend(inline_items(rest));
        } else if let Some(rest) = after_label(line, "Priority Improvements:") {
            list = List::Improvements;
            improvements.extend(inline_items(rest));
        } else if let Some(item) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
            let item = item.trim().to_string();
            match list {
                List::Strengths if !item.is_empty() => strengths.push(item),
                List::Improvements if !item.is_empty() => improvements.push(item),
                _ => {}
            }
        }
    }

    let score = score.ok_or_else(|| {
        GenerationError::InvalidResponse("quality review has no overall score".to_string())
    })?;
    Ok(QualityAssessment {
        score,
        readiness,
        strengths,
        improvements,
    })
}

fn after_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    head.eq_ignore_ascii_case(label)
        .then(|| line[label.len()..].trim().trim_matches('*').trim())
}

/// `7.5/10`, `8 / 10` or a bare `9`, clamped to the 0-10 scale
fn parse_score(text: &str) -> Option<f32> {
    let number = text.split('/').next()?.trim();
    number
        .parse::<f32>()
        .ok()
        .filter(|score| score.is_finite())
        .map(|score| score.clamp(0.0, 10.0))
}

/// Items written on the label line, e.g. `[clear tone, good examples]`
fn inline_items(text: &str) -> Vec<String> {
    text.trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = "\
**Overall Quality Score: 7.5/10**
Readiness Level: Needs Minor Improvements
Key Strengths:
- Plain language
- Concrete savings targets
Priority Improvements:
- Add a worked budget example
- Cite current interest rates
";

    #[test]
    fn test_parse_full_reply() {
        let assessment = parse_assessment(REPLY).unwrap();
        assert_eq!(assessment.score, 7.5);
        assert_eq!(
            assessment.readiness.as_deref(),
            Some("Needs Minor Improvements")
        );
        assert_eq!(
            assessment.strengths,
            vec!["Plain language", "Concrete savings targets"]
        );
        assert_eq!(assessment.improvements.len(), 2);
        assert_eq!(assessment.improvements[0], "Add a worked budget example");
    }

    #[test]
    fn test_parse_inline_lists() {
        let reply = "Overall Quality Score: 9\n\
                     Key Strengths: [clear tone, good examples]\n\
                     Priority Improvements: [shorter intro]";
        let assessment = parse_assessment(reply).unwrap();
        assert_eq!(assessment.score, 9.0);
        assert!(assessment.readiness.is_none());
        assert_eq!(assessment.strengths, vec!["clear tone", "good examples"]);
        assert_eq!(assessment.improvements, vec!["shorter intro"]);
    }

    #[test]
    fn test_reply_without_score_is_rejected() {
        let reply = "Key Strengths:\n- Plain language";
        assert!(matches!(
            parse_assessment(reply),
            Err(GenerationError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(parse_score("12/10"), Some(10.0));
        assert_eq!(parse_score(" 8 / 10"), Some(8.0));
        assert_eq!(parse_score("great"), None);
    }

    #[test]
    fn test_review_labels() {
        assert_eq!(QualityReview::Disabled.label(), "disabled");
        let review = QualityReview::Unavailable("timeout".into());
        assert_eq!(review.label(), "unavailable");
        assert!(review.assessment().is_none());
    }
}
