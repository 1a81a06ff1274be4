use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::document::Document;
use crate::error::ChunkError;

/// Separator placed between cleaned pages; counted as part of the preceding page
const PAGE_SEPARATOR: &str = "\n\n";

/// A bounded, overlap-aware segment of a source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Deterministic id derived from the source and the chunk index
    pub id: String,
    /// The chunk text, exactly as it appears in the cleaned document
    pub text: String,
    /// File the chunk was cut from
    pub source_filename: String,
    /// Page contributing the most characters to this chunk (1-based)
    pub page_number: u32,
    /// Position of the chunk within its document
    pub chunk_index: usize,
    /// Character offset of the first character in the cleaned document
    pub char_start: usize,
    /// Character offset one past the last character
    pub char_end: usize,
}

impl DocumentChunk {
    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }
}

/// Stable point id for a chunk, so re-ingesting a document overwrites rather than duplicates
pub fn chunk_id(source_filename: &str, chunk_index: usize) -> String {
    let name = format!("{}#{}", source_filename, chunk_index);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

#[derive(Debug, Clone, Copy)]
struct PageSpan {
    start: usize,
    end: usize,
    page_number: u32,
}

/// Splits cleaned document text into fixed-size, overlapping chunks
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, ChunkError> {
        if config.chunk_size == 0 || config.chunk_overlap >= config.chunk_size {
            return Err(ChunkError::InvalidOverlap {
                size: config.chunk_size,
                overlap: config.chunk_overlap,
            });
        }
        Ok(Chunker { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk every page of a loaded document
    pub fn chunk_document(&self, document: &Document) -> Result<Vec<DocumentChunk>, ChunkError> {
        self.chunk_pages(&document.source_filename, &document.pages)
    }

    /// Chunk a single block of text, attributed to page 1
    pub fn chunk_text(&self, source: &str, text: &str) -> Result<Vec<DocumentChunk>, ChunkError> {
        self.chunk_pages(source, &[text])
    }

    /// Clean the pages, join them, and cut the result into chunks
    pub fn chunk_pages<S: AsRef<str>>(
        &self,
        source: &str,
        pages: &[S],
    ) -> Result<Vec<DocumentChunk>, ChunkError> {
        let (chars, spans) = join_pages(pages);
        if chars.is_empty() {
            return Err(ChunkError::EmptyDocument(source.to_string()));
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = self.find_end(&chars, start);
            let chunk_index = chunks.len();
            chunks.push(DocumentChunk {
                id: chunk_id(source, chunk_index),
                text: chars[start..end].iter().collect(),
                source_filename: source.to_string(),
                page_number: dominant_page(&spans, start, end),
                chunk_index,
                char_start: start,
                char_end: end,
            });

            if end >= chars.len() {
                break;
            }
            start = end - self.config.chunk_overlap;
        }

        debug!(
            "Split {} ({} chars) into {} chunks",
            source,
            chars.len(),
            chunks.len()
        );
        Ok(chunks)
    }

    /// End offset of the chunk starting at `start`.
    ///
    /// The cut lands after a sentence break if one lies inside the tolerance window,
    /// otherwise after whitespace, otherwise exactly at `chunk_size`. The end always stays
    /// past `start + overlap` so the next chunk makes progress.
    fn find_end(&self, chars: &[char], start: usize) -> usize {
        let target = start + self.config.chunk_size;
        if target >= chars.len() {
            return chars.len();
        }

        let floor = start + self.config.chunk_overlap + 1;
        let lowest = target
            .saturating_sub(self.config.boundary_window)
            .max(floor)
            .min(target);

        let candidates = || (lowest..=target).rev();
        candidates()
            .find(|&end| is_sentence_break(chars, end))
            .or_else(|| candidates().find(|&end| chars[end - 1].is_whitespace()))
            .unwrap_or(target)
    }
}

/// A cut at `end` follows whitespace that closes a sentence or paragraph
fn is_sentence_break(chars: &[char], end: usize) -> bool {
    end >= 2
        && chars[end - 1].is_whitespace()
        && matches!(chars[end - 2], '.' | '!' | '?' | '\n')
}

fn join_pages<S: AsRef<str>>(pages: &[S]) -> (Vec<char>, Vec<PageSpan>) {
    let mut chars: Vec<char> = Vec::new();
    let mut spans: Vec<PageSpan> = Vec::new();

    for (idx, page) in pages.iter().enumerate() {
        let cleaned = normalize_whitespace(page.as_ref());
        if cleaned.is_empty() {
            continue;
        }

        if let Some(previous) = spans.last_mut() {
            chars.extend(PAGE_SEPARATOR.chars());
            previous.end = chars.len();
        }

        let start = chars.len();
        chars.extend(cleaned.chars());
        spans.push(PageSpan {
            start,
            end: chars.len(),
            page_number: idx as u32 + 1,
        });
    }

    (chars, spans)
}

/// Page with the largest share of `[start, end)`; the earlier page wins ties
fn dominant_page(spans: &[PageSpan], start: usize, end: usize) -> u32 {
    let mut best = (0, spans.first().map(|s| s.page_number).unwrap_or(1));
    for span in spans {
        let covered = end.min(span.end).saturating_sub(start.max(span.start));
        if covered > best.0 {
            best = (covered, span.page_number);
        }
    }
    best.1
}

/// Normalize whitespace in extracted text.
///
/// Carriage returns are dropped, runs of spaces and tabs collapse to one space, a single
/// newline is kept as a line break, two or more become a paragraph break, and leading and
/// trailing whitespace disappears.
pub fn normalize_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut newlines = 0;
    let mut space = false;

    for c in text.chars() {
        match c {
            '\r' => {}
            '\n' => {
                newlines += 1;
                space = false;
            }
            c if c.is_whitespace() => space = true,
            c => {
                if !normalized.is_empty() {
                    if newlines >= 2 {
                        normalized.push_str("\n\n");
                    } else if newlines == 1 {
                        normalized.push('\n');
                    } else if space {
                        normalized.push(' ');
                    }
                }
                newlines = 0;
                space = false;
                normalized.push(c);
            }
        }
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize, window: usize) -> Chunker {
        Chunker::new(ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            boundary_window: window,
        })
        .unwrap()
    }

    fn reconstruct(chunks: &[DocumentChunk], overlap: usize) -> String {
        let mut text = String::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let skip = if idx == 0 { 0 } else { overlap };
            text.extend(chunk.text.chars().skip(skip));
        }
        text
    }

    #[test]
    fn test_normalize_whitespace() {
        let text = "This  has   multiple    spaces.\n\n\nAnd multiple newlines.\r\nAnd Windows line endings.";
        let expected =
            "This has multiple spaces.\n\nAnd multiple newlines.\nAnd Windows line endings.";
        assert_eq!(normalize_whitespace(text), expected);
        assert_eq!(normalize_whitespace("  \t padded \n"), "padded");
    }

    #[test]
    fn test_2500_char_document_yields_three_overlapping_chunks() {
        let text = format!("{}abcde", "abcd ".repeat(499));
        assert_eq!(text.chars().count(), 2500);

        let chunks = chunker(1000, 200, 100).chunk_text("savings.pdf", &text).unwrap();

        assert_eq!(chunks.len(), 3);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().skip(pair[0].char_len() - 200).collect();
            let head: String = pair[1].text.chars().take(200).collect();
            assert_eq!(head, tail);
            assert_eq!(pair[1].char_start, pair[0].char_end - 200);
        }
        assert_eq!(chunks[2].char_end, 2500);
    }

    #[test]
    fn test_hard_cut_without_whitespace() {
        let text = "x".repeat(2500);
        let chunks = chunker(1000, 200, 100).chunk_text("dense.txt", &text).unwrap();

        let lengths: Vec<usize> = chunks.iter().map(DocumentChunk::char_len).collect();
        assert_eq!(lengths, vec![1000, 1000, 900]);
    }

    #[test]
    fn test_prefers_sentence_break_within_window() {
        let text = "Alpha beta gamma. Delta epsilon zeta eta theta.";
        let chunks = chunker(30, 5, 15).chunk_text("notes.txt", text).unwrap();

        assert_eq!(chunks[0].text, "Alpha beta gamma. ");
        assert_eq!(chunks.last().unwrap().char_end, text.chars().count());
        assert_eq!(reconstruct(&chunks, 5), text);
    }

    #[test]
    fn test_reconstructs_cleaned_text() {
        let text = "Compound interest grows savings over time. Inflation erodes purchasing power!\n\n\
                    An emergency fund should cover three to six months of expenses. \
                    Diversification spreads risk across asset classes; index funds keep fees low.\n\
                    Budget first, then invest the surplus every month without fail.";
        let cleaned = normalize_whitespace(text);

        for (size, overlap, window) in [(40, 10, 10), (64, 16, 30), (100, 0, 20), (25, 24, 5)] {
            let chunks = chunker(size, overlap, window).chunk_text("guide.pdf", text).unwrap();
            assert_eq!(reconstruct(&chunks, overlap), cleaned, "size={size} overlap={overlap}");
            for chunk in &chunks {
                assert!(chunk.char_len() <= size);
                assert!(chunk.char_len() > overlap || chunk.char_end == cleaned.chars().count());
            }
        }
    }

    #[test]
    fn test_final_partial_chunk_is_kept() {
        let text = "y".repeat(1050);
        let chunks = chunker(1000, 200, 100).chunk_text("short.txt", &text).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].char_start, 800);
        assert_eq!(chunks[1].char_len(), 250);
    }

    #[test]
    fn test_page_number_follows_dominant_page() {
        let pages = vec!["a".repeat(150), "b".repeat(300)];
        let chunks = chunker(200, 50, 100).chunk_pages("report.pdf", &pages).unwrap();

        let page_numbers: Vec<u32> = chunks.iter().map(|c| c.page_number).collect();
        assert_eq!(page_numbers, vec![1, 2, 2]);
        assert_eq!(chunks[0].char_end, 152);
    }

    #[test]
    fn test_blank_pages_keep_their_numbers() {
        let pages = vec!["   ", "Only the second page has text."];
        let chunks = chunker(1000, 200, 100).chunk_pages("scan.pdf", &pages).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_number, 2);
    }

    #[test]
    fn test_empty_document_is_an_error() {
        let err = chunker(1000, 200, 100)
            .chunk_pages("blank.pdf", &[" \n\n ", "\r\n"])
            .unwrap_err();
        assert!(matches!(err, ChunkError::EmptyDocument(name) if name == "blank.pdf"));
    }

    #[test]
    fn test_ids_are_deterministic_and_distinct() {
        let text = "z".repeat(3000);
        let first = chunker(1000, 200, 100).chunk_text("a.pdf", &text).unwrap();
        let second = chunker(1000, 200, 100).chunk_text("a.pdf", &text).unwrap();
        let other = chunker(1000, 200, 100).chunk_text("b.pdf", &text).unwrap();

        assert_eq!(first[0].id, second[0].id);
        assert_ne!(first[0].id, first[1].id);
        assert_ne!(first[0].id, other[0].id);
    }

    #[test]
    fn test_invalid_overlap_is_rejected() {
        let result = Chunker::new(ChunkingConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            boundary_window: 10,
        });
        assert!(matches!(result, Err(ChunkError::InvalidOverlap { .. })));
    }
}
