use futures::future::try_join_all;
use log::{debug, info};
use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::context::{ContextAssembler, ContextBlock};
use crate::database::RetrievalResult;
use crate::error::HandoutError;
use crate::retriever::{Query, Retriever};

/// Retrieves knowledge-base material for a handout topic
pub struct ContentExtractor {
    retriever: Retriever,
    assembler: ContextAssembler,
    retrieval: RetrievalConfig,
    context_chars: usize,
}

/// The topic itself plus angles that match each handout section
pub fn extraction_queries(topic: &str) -> Vec<String> {
    let topic = topic.trim();
    vec![
        topic.to_string(),
        format!("{} key concepts definitions fundamentals", topic),
        format!("{} practical applications real world examples", topic),
        format!("{} risks considerations best practices", topic),
    ]
}

impl ContentExtractor {
    pub fn new(retriever: Retriever, retrieval: RetrievalConfig, context_chars: usize) -> Self {
        ContentExtractor {
            retriever,
            assembler: ContextAssembler::new(),
            retrieval,
            context_chars,
        }
    }

    /// Grounding context for `topic`; failing to retrieve, or finding nothing, is fatal
    pub async fn extract(&self, topic: &str) -> Result<ContextBlock, HandoutError> {
        let queries: Vec<Query> = extraction_queries(topic)
            .into_iter()
            .map(|text| Query::new(text, &self.retrieval))
            .collect();

        let batches =
            try_join_all(queries.iter().map(|query| self.retriever.retrieve(query))).await?;
        let merged = merge_results(batches);
        debug!("Merged {} distinct chunks for {:?}", merged.len(), topic);

        let block = self.assembler.assemble(&merged, self.context_chars);
        if block.is_empty() {
            return Err(HandoutError::NoGrounding(topic.to_string()));
        }

        info!(
            "Extracted {} chunks from {} sources for {:?}",
            block.included.len(),
            block.attributions.len(),
            topic
        );
        Ok(block)
    }
}

/// Union of several result lists keyed by chunk id, keeping each chunk's best score
fn merge_results(batches: Vec<Vec<RetrievalResult>>) -> Vec<RetrievalResult> {
    let mut merged: Vec<RetrievalResult> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for result in batches.into_iter().flatten() {
        match slots.get(&result.chunk.id) {
            Some(&slot) => {
                if result.score > merged[slot].score {
                    merged[slot].score = result.score;
                }
            }
            None => {
                slots.insert(result.chunk.id.clone(), merged.len());
                merged.push(result);
            }
        }
    }

    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged
}
