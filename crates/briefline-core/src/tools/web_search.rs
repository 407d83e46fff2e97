//! Local web-search tool backed by the Tavily search API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::Tool;
use crate::config::SearchSettings;
use crate::{BriefError, SecretValue};

pub const WEB_SEARCH_TOOL: &str = "web_search";
pub const DEFAULT_MAX_RESULTS: usize = 5;

/// Search hit in the shape handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: Option<String>,
    pub link: Option<String>,
    pub snippet: String,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawResult>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Thin client over the search endpoint. Every failure degrades to an empty list.
#[derive(Clone)]
pub struct TavilyClient {
    http: Client,
    endpoint: String,
    api_key: Option<SecretValue>,
    snippet_chars: usize,
}

impl TavilyClient {
    pub fn new(settings: &SearchSettings) -> Result<Self, BriefError> {
        let http = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            http,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            snippet_chars: settings.snippet_chars,
        })
    }

    /// Run a search and return at most `max_results` hits.
    pub async fn search(&self, query: &str, max_results: usize) -> Vec<SearchHit> {
        let Some(api_key) = &self.api_key else {
            warn!("search API key not configured; returning empty results");
            return Vec::new();
        };

        match self.try_search(api_key, query, max_results).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, %query, "web search failed");
                Vec::new()
            }
        }
    }

    async fn try_search(
        &self,
        api_key: &SecretValue,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, BriefError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&SearchRequest {
                api_key: api_key.expose(),
                query,
                max_results,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BriefError::from_response(response).await);
        }

        let body: SearchResponse = response.json().await?;
        Ok(map_results(body.results, max_results, self.snippet_chars))
    }
}

fn map_results(results: Vec<RawResult>, max_results: usize, snippet_chars: usize) -> Vec<SearchHit> {
    results
        .into_iter()
        .take(max_results)
        .map(|item| SearchHit {
            title: item.title,
            link: item.url,
            snippet: item
                .content
                .unwrap_or_default()
                .chars()
                .take(snippet_chars)
                .collect(),
        })
        .collect()
}

/// `web_search(query, max_results=5)` exposed to the model.
pub struct WebSearchTool {
    client: TavilyClient,
}

impl WebSearchTool {
    pub fn new(client: TavilyClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Usage: web_search(query: str, max_results: int=5)"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results",
                    "default": DEFAULT_MAX_RESULTS
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<String, BriefError> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| BriefError::tool(WEB_SEARCH_TOOL, "missing string argument `query`"))?;
        let max_results = arguments
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        info!(%query, max_results, "web_search called");
        let hits = self.client.search(query, max_results).await;
        if hits.is_empty() {
            return Ok("[]".to_string());
        }
        serde_json::to_string_pretty(&hits)
            .map_err(|err| BriefError::tool(WEB_SEARCH_TOOL, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(title: &str, url: &str, content: &str) -> RawResult {
        RawResult {
            title: Some(title.into()),
            url: Some(url.into()),
            content: Some(content.into()),
        }
    }

    #[test]
    fn results_are_truncated_and_capped() {
        let long = "é".repeat(500);
        let results = vec![
            raw("One", "https://one.example", &long),
            raw("Two", "https://two.example", "short"),
            raw("Three", "https://three.example", "dropped"),
        ];

        let hits = map_results(results, 2, 400);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].snippet.chars().count(), 400);
        assert_eq!(hits[0].link.as_deref(), Some("https://one.example"));
        assert_eq!(hits[1].snippet, "short");
    }

    #[test]
    fn missing_fields_map_to_null_and_empty() {
        let hits = map_results(
            vec![RawResult {
                title: None,
                url: None,
                content: None,
            }],
            5,
            400,
        );
        let encoded = serde_json::to_value(&hits).unwrap();
        assert_eq!(encoded, json!([{"title": null, "link": null, "snippet": ""}]));
    }

    #[tokio::test]
    async fn missing_key_short_circuits() {
        let settings = SearchSettings::new("http://127.0.0.1:9/search", None);
        let tool = WebSearchTool::new(TavilyClient::new(&settings).unwrap());

        let output = tool.call(json!({"query": "rust"})).await.unwrap();
        assert_eq!(output, "[]");
    }

    #[tokio::test]
    async fn query_argument_is_required() {
        let settings = SearchSettings::new("http://127.0.0.1:9/search", None);
        let tool = WebSearchTool::new(TavilyClient::new(&settings).unwrap());

        let err = tool.call(json!({"max_results": 2})).await.unwrap_err();
        assert!(matches!(err, BriefError::Tool { .. }));
    }
}
