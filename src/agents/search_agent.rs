use log::{debug, info, warn};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SearchError;
use crate::retry::RetryPolicy;
use crate::search::{SearchHit, SearchProvider};

/// Snippets shorter than this carry too little to ground anything
const MIN_SNIPPET_CHARS: usize = 50;

/// How many search queries a topic fans out into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchDepth {
    Basic,
    #[default]
    Standard,
    Comprehensive,
}

impl SearchDepth {
    pub fn query_count(&self) -> usize {
        match self {
            SearchDepth::Basic => 2,
            SearchDepth::Standard => 3,
            SearchDepth::Comprehensive => 5,
        }
    }
}

impl FromStr for SearchDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(SearchDepth::Basic),
            "standard" => Ok(SearchDepth::Standard),
            "comprehensive" => Ok(SearchDepth::Comprehensive),
            other => Err(format!("unknown search depth {:?}", other)),
        }
    }
}

impl fmt::Display for SearchDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchDepth::Basic => write!(f, "basic"),
            SearchDepth::Standard => write!(f, "standard"),
            SearchDepth::Comprehensive => write!(f, "comprehensive"),
        }
    }
}

/// Queries for a topic, most general first
pub fn search_queries(topic: &str, depth: SearchDepth) -> Vec<String> {
    let topic = topic.trim();
    [
        format!("{} personal finance guide", topic),
        format!("{} latest news and trends", topic),
        format!("{} common mistakes to avoid", topic),
        format!("{} tips for beginners", topic),
        format!("{} statistics and data", topic),
    ]
    .into_iter()
    .take(depth.query_count())
    .collect()
}

/// Gathers recent web material for a topic
pub struct SearchAgent {
    provider: Arc<dyn SearchProvider>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl SearchAgent {
    pub fn new(provider: Arc<dyn SearchProvider>, timeout: Duration, retry: RetryPolicy) -> Self {
        SearchAgent {
            provider,
            timeout,
            retry,
        }
    }

    /// Run every query for `topic` within the stage timeout.
    ///
    /// A failing query is skipped; the stage fails only when all of them fail or time runs out.
    pub async fn gather(
        &self,
        topic: &str,
        depth: SearchDepth,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let queries = search_queries(topic, depth);
        info!(
            "Searching the web with {} queries ({} depth)",
            queries.len(),
            depth
        );

        tokio::time::timeout(self.timeout, self.run_queries(&queries))
            .await
            .map_err(|_| SearchError::Timeout(self.timeout))?
    }

    async fn run_queries(&self, queries: &[String]) -> Result<Vec<SearchHit>, SearchError> {
        let mut hits = Vec::new();
        let mut last_error = None;

        for query in queries {
            let provider = &self.provider;
            let query = query.as_str();
            match self
                .retry
                .run("web search", move || async move { provider.search(query).await })
                .await
            {
                Ok(found) => {
                    debug!("{} results for {:?}", found.len(), query);
                    hits.extend(found);
                }
                Err(e) => {
                    warn!("Search error for query {:?}: {}", query, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if hits.is_empty() => Err(e),
            _ => Ok(clean_hits(hits)),
        }
    }
}

/// Drop thin snippets, normalize the rest and keep the first hit per link
pub fn clean_hits(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter_map(|hit| {
            let snippet = clean_snippet(&hit.snippet);
            if snippet.chars().count() < MIN_SNIPPET_CHARS {
                return None;
            }
            let key = if hit.link.is_empty() {
                hit.title.clone()
            } else {
                hit.link.clone()
            };
            seen.insert(key).then(|| SearchHit { snippet, ..hit })
        })
        .collect()
}

/// Collapse whitespace, drop leading list numbering and a trailing ellipsis
fn clean_snippet(snippet: &str) -> String {
    let collapsed = snippet.split_whitespace().collect::<Vec<_>>().join(" ");

    let digits = collapsed.chars().take_while(|c| c.is_ascii_digit()).count();
    let without_number = if digits > 0 {
        let rest = collapsed[digits..].trim_start();
        match rest.strip_prefix(['.', ')', '-']) {
            Some(stripped) => stripped.trim_start(),
            None => collapsed.as_str(),
        }
    } else {
        collapsed.as_str()
    };

    without_number
        .trim_end()
        .trim_end_matches("...")
        .trim_end_matches('…')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn hit(link: &str, snippet: &str) -> SearchHit {
        SearchHit {
            title: format!("Title for {}", link),
            snippet: snippet.to_string(),
            link: link.to_string(),
            date: None,
        }
    }

    const LONG: &str = "High-yield savings accounts currently pay far more than the national average.";

    #[test]
    fn test_query_count_follows_depth() {
        assert_eq!(search_queries("budgeting", SearchDepth::Basic).len(), 2);
        assert_eq!(search_queries("budgeting", SearchDepth::Standard).len(), 3);
        assert_eq!(search_queries("budgeting", SearchDepth::Comprehensive).len(), 5);
        assert_eq!(
            search_queries(" budgeting ", SearchDepth::Basic)[0],
            "budgeting personal finance guide"
        );
    }

    #[test]
    fn test_depth_parsing() {
        assert_eq!("Comprehensive".parse::<SearchDepth>(), Ok(SearchDepth::Comprehensive));
        assert!("deep".parse::<SearchDepth>().is_err());
        assert_eq!(SearchDepth::default().to_string(), "standard");
    }

    #[test]
    fn test_clean_hits_filters_and_dedups() {
        let hits = vec![
            hit("https://a.example", LONG),
            hit("https://b.example", "Too short."),
            hit("https://a.example", LONG),
            hit("https://c.example", &format!("3. {}   ...", LONG)),
        ];
        let cleaned = clean_hits(hits);

        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].link, "https://a.example");
        assert_eq!(cleaned[1].snippet, LONG);
    }

    struct SlowSearch;

    #[async_trait]
    impl SearchProvider for SlowSearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, SearchError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    struct FlakySearch;

    #[async_trait]
    impl SearchProvider for FlakySearch {
        async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
            if query.contains("news") {
                Err(SearchError::Service("quota exceeded".into()))
            } else {
                Ok(vec![hit(&format!("https://{}.example", query.len()), LONG)])
            }
        }
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let agent = SearchAgent::new(
            Arc::new(SlowSearch),
            Duration::from_millis(20),
            RetryPolicy::none(),
        );
        let result = agent.gather("credit scores", SearchDepth::Basic).await;
        assert!(matches!(result, Err(SearchError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_one_failing_query_is_skipped() {
        let agent = SearchAgent::new(
            Arc::new(FlakySearch),
            Duration::from_secs(5),
            RetryPolicy::none(),
        );
        let hits = agent.gather("credit scores", SearchDepth::Standard).await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}
