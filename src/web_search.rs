//! Web search backends for the `web_search` tool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::WebSearchConfig;
use crate::error::{StudyError, StudyResult};

const TAVILY_URL: &str = "https://api.tavily.com/search";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// `topic` is one of `general`, `news`, `finance`.
    async fn search(&self, query: &str, max_results: usize, topic: &str) -> StudyResult<Vec<WebResult>>;
}

pub struct DisabledWebSearch;

#[async_trait]
impl WebSearch for DisabledWebSearch {
    async fn search(&self, _query: &str, _max_results: usize, _topic: &str) -> StudyResult<Vec<WebResult>> {
        Err(StudyError::WebSearch("web search is disabled".to_string()))
    }
}

/// Tavily search API. Requires `TAVILY_API_KEY`.
pub struct TavilySearch {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl TavilySearch {
    pub fn new(config: &WebSearchConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("TAVILY_API_KEY")
            .map_err(|_| anyhow::anyhow!("TAVILY_API_KEY environment variable not set"))?;
        Self::with_endpoint(config, api_key, TAVILY_URL)
    }

    pub fn with_endpoint(
        config: &WebSearchConfig,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str, max_results: usize, topic: &str) -> StudyResult<Vec<WebResult>> {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
            "topic": topic,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| StudyError::WebSearch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StudyError::WebSearch(format!("Tavily error {}: {}", status, text)));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| StudyError::WebSearch(e.to_string()))?;
        Ok(parsed.results)
    }
}

pub fn create_web_search(config: &WebSearchConfig) -> anyhow::Result<Arc<dyn WebSearch>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledWebSearch)),
        "tavily" => Ok(Arc::new(TavilySearch::new(config)?)),
        other => anyhow::bail!("Unknown web search provider: {}", other),
    }
}

/// Agent-facing rendering of a result list.
pub fn render_results(query: &str, results: &[WebResult]) -> String {
    if results.is_empty() {
        return format!("No web results found for '{}'.", query);
    }
    let parts: Vec<String> = results
        .iter()
        .map(|r| format!("## {}\n**URL:** {}\n\n{}\n\n---", r.title, r.url, r.content))
        .collect();
    format!(
        "🔍 {} result(s) for '{}':\n\n{}",
        results.len(),
        query,
        parts.join("\n")
    )
}
