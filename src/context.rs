use crate::database::RetrievalResult;

/// Separator between two context entries
const ENTRY_SEPARATOR: &str = "\n\n";

/// Attributed evidence handed to the generation stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextBlock {
    pub text: String,
    /// Source files that contributed, in first-seen order
    pub attributions: Vec<String>,
    /// The results that made it into `text`
    pub included: Vec<RetrievalResult>,
}

impl ContextBlock {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Length of the text in characters
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Builds a bounded context string from ranked results
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn new() -> Self {
        ContextAssembler
    }

    /// Append whole entries in ranked order until the next one would exceed `max_chars`
    pub fn assemble(&self, results: &[RetrievalResult], max_chars: usize) -> ContextBlock {
        let mut block = ContextBlock::default();
        let mut used = 0;

        for result in results {
            let entry = format_entry(result);
            let separator = if block.text.is_empty() { 0 } else { ENTRY_SEPARATOR.len() };
            let cost = separator + entry.chars().count();
            if used + cost > max_chars {
                break;
            }

            if separator > 0 {
                block.text.push_str(ENTRY_SEPARATOR);
            }
            block.text.push_str(&entry);
            used += cost;

            let source = &result.chunk.source_filename;
            if !block.attributions.contains(source) {
                block.attributions.push(source.clone());
            }
            block.included.push(result.clone());
        }

        block
    }
}

fn format_entry(result: &RetrievalResult) -> String {
    format!(
        "[Source: {}, page {} (relevance {:.2})]\n{}",
        result.chunk.source_filename, result.chunk.page_number, result.score, result.chunk.text
    )
}
