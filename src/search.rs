//! External web search used to augment handouts with recent material.

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{env_opt, env_or};
use crate::error::SearchError;

/// Configuration for the search provider
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub results_per_query: usize,
    pub request_timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            api_key: None,
            endpoint: "https://serpapi.com/search.json".to_string(),
            results_per_query: 10,
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl SearchConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = SearchConfig::default();
        Ok(SearchConfig {
            api_key: env_opt("SERPAPI_API_KEY")?,
            endpoint: env_or("SERPAPI_ENDPOINT", defaults.endpoint)?,
            results_per_query: env_or("SEARCH_RESULTS_PER_QUERY", defaults.results_per_query)?,
            request_timeout: defaults.request_timeout,
        })
    }
}

/// One ranked web result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub link: String,
    pub date: Option<String>,
}

/// Query string in, ranked hits out
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

/// Google results through SerpAPI
pub struct SerpApiClient {
    config: SearchConfig,
    api_key: String,
    client: reqwest::Client,
}

impl SerpApiClient {
    pub fn new(config: SearchConfig) -> Result<Self, SearchError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| SearchError::NotConfigured("SERPAPI_API_KEY is not set".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SearchError::NotConfigured(e.to_string()))?;
        Ok(SerpApiClient {
            config,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl SearchProvider for SerpApiClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        debug!("Searching the web for {:?}", query);
        let num = self.config.results_per_query.to_string();
        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("num", num.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout(self.config.request_timeout)
                } else {
                    SearchError::Service(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SearchError::Service(format!(
                "Search request failed: {} {}",
                status, error_text
            )));
        }

        let body: SerpResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Service(e.to_string()))?;
        Ok(body.into_hits())
    }
}

#[derive(Deserialize, Debug, Default)]
struct SerpResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
    answer_box: Option<AnswerBox>,
}

#[derive(Deserialize, Debug)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    link: String,
    date: Option<String>,
}

#[derive(Deserialize, Debug)]
struct AnswerBox {
    #[serde(default)]
    title: String,
    snippet: Option<String>,
    answer: Option<String>,
    #[serde(default)]
    link: String,
}

impl SerpResponse {
    /// Featured answer first, then organic results in rank order
    fn into_hits(self) -> Vec<SearchHit> {
        let featured = self.answer_box.and_then(|answer| {
            let snippet = answer.snippet.or(answer.answer)?;
            Some(SearchHit {
                title: format!("Featured Answer: {}", answer.title),
                snippet,
                link: answer.link,
                date: None,
            })
        });

        featured
            .into_iter()
            .chain(self.organic_results.into_iter().map(|r| SearchHit {
                title: r.title,
                snippet: r.snippet,
                link: r.link,
                date: r.date,
            }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serp_response_parsing() {
        let body: SerpResponse = serde_json::from_value(json!({
            "answer_box": {"title": "APR", "answer": "Annual percentage rate", "link": "https://a.example"},
            "organic_results": [
                {"title": "What is APR", "snippet": "APR is the yearly cost.", "link": "https://b.example", "date": "Jan 3, 2025"},
                {"title": "No snippet", "link": "https://c.example"}
            ]
        }))
        .unwrap();

        let hits = body.into_hits();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "Featured Answer: APR");
        assert_eq!(hits[0].snippet, "Annual percentage rate");
        assert_eq!(hits[1].date.as_deref(), Some("Jan 3, 2025"));
        assert_eq!(hits[2].snippet, "");
    }

    #[test]
    fn test_client_requires_key() {
        assert!(matches!(
            SerpApiClient::new(SearchConfig::default()),
            Err(SearchError::NotConfigured(_))
        ));
    }
}
