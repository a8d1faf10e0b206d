// src/search/mod.rs
// Quota-gated web search plus parallel page fetch + readability extraction.
// Never raises: every failure mode is folded into an error string or a
// result entry missing its `content` field, matching the way the rest of
// the pipeline treats search as a best-effort enrichment source.

pub mod quota;

use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::SearchConfig;
use quota::QuotaLedger;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: String,
    #[serde(default)]
    pub extra_snippets: Vec<String>,
    #[serde(default)]
    pub page_age: Option<String>,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
}

pub struct SearchClient {
    http: reqwest::Client,
    api_key: Option<String>,
    quota: QuotaLedger,
    config: SearchConfig,
}

impl SearchClient {
    pub fn new(api_key: Option<String>, config: SearchConfig, usage_path: impl AsRef<std::path::Path>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            quota: QuotaLedger::new(config.clone(), usage_path),
            config,
        }
    }

    /// Returns either a shaped result set or a descriptive error string -
    /// the orchestrator folds either one into the prompt's search section.
    pub async fn search_and_browse(&self, query: &str) -> Result<SearchResponse, String> {
        let Some(api_key) = &self.api_key else {
            return Err("[Error: search is not configured on this gateway.]".to_string());
        };

        self.quota.check().await?;

        let response = self
            .http
            .get("https://api.search.brave.com/res/v1/web/search")
            .query(&[("q", query), ("count", &self.config.max_results.to_string())])
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| format!("[Search Exception: {e}]"))?;

        if !response.status().is_success() {
            crate::metrics::record_search("http_error");
            return Err(format!(
                "[Error: search API returned {}.]",
                response.status()
            ));
        }

        self.quota.consume().await;
        crate::metrics::record_search("ok");

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("[Search Exception: failed to parse response: {e}]"))?;

        let mut results = parse_results(&body);
        prioritize_wikipedia(&mut results);
        results.truncate(self.config.max_results);

        let fetches = results
            .into_iter()
            .map(|r| self.attach_content(r));
        let results = join_all(fetches).await;

        Ok(SearchResponse {
            query: query.to_string(),
            results,
        })
    }

    async fn attach_content(&self, mut result: SearchResult) -> SearchResult {
        match visit_page(&self.http, &result.url, self.config.max_chars_per_result, self.config.fetch_timeout_sec).await {
            Ok(text) if !is_error_content(&text) => {
                result.content = Some(text);
            }
            Ok(text) => {
                warn!(url = %result.url, "page fetch returned an error marker: {text}");
            }
            Err(e) => {
                warn!(url = %result.url, "page fetch failed: {e}");
            }
        }
        result
    }
}

fn parse_results(body: &serde_json::Value) -> Vec<SearchResult> {
    body.get("web")
        .and_then(|w| w.get("results"))
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    Some(SearchResult {
                        title: item.get("title")?.as_str()?.to_string(),
                        url: item.get("url")?.as_str()?.to_string(),
                        description: item
                            .get("description")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string(),
                        extra_snippets: item
                            .get("extra_snippets")
                            .and_then(|v| v.as_array())
                            .map(|arr| {
                                arr.iter()
                                    .filter_map(|v| v.as_str().map(String::from))
                                    .collect()
                            })
                            .unwrap_or_default(),
                        page_age: item.get("page_age").and_then(|v| v.as_str()).map(String::from),
                        age: item.get("age").and_then(|v| v.as_str()).map(String::from),
                        content: None,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Stably reorder so wikipedia.org results come first.
fn prioritize_wikipedia(results: &mut [SearchResult]) {
    results.sort_by_key(|r| !r.url.contains("wikipedia.org"));
}

fn is_error_content(text: &str) -> bool {
    text.starts_with("[Error:") || text.starts_with("[Browser Error:")
}

async fn visit_page(
    http: &reqwest::Client,
    url: &str,
    max_chars: usize,
    timeout_sec: u64,
) -> Result<String, String> {
    let fetch = async {
        let response = http
            .get(url)
            .header("User-Agent", "Mozilla/5.0 (compatible; gateway-browser/1.0)")
            .send()
            .await
            .map_err(|e| format!("[Browser Error: {e}]"))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| format!("[Browser Error: {e}]"))?;

        let parsed_url = url::Url::parse(url).map_err(|e| format!("[Browser Error: {e}]"))?;
        let mut cursor = std::io::Cursor::new(body);
        let product = readability::extractor::extract(&mut cursor, &parsed_url)
            .map_err(|e| format!("[Browser Error: {e}]"))?;

        if product.text.trim().is_empty() {
            return Err("[Error: Page loaded but no readable text found.]".to_string());
        }

        let mut text = product.text;
        if text.chars().count() > max_chars {
            text = text.chars().take(max_chars).collect();
            text.push_str("\n[...remaining text truncated for brevity...]");
        }
        Ok(text)
    };

    match tokio::time::timeout(Duration::from_secs(timeout_sec), fetch).await {
        Ok(result) => result,
        Err(_) => Err("[Browser Error: timed out]".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wikipedia_results_move_to_the_front() {
        let mut results = vec![
            SearchResult {
                title: "A".into(),
                url: "https://example.com/a".into(),
                description: String::new(),
                extra_snippets: vec![],
                page_age: None,
                age: None,
                content: None,
            },
            SearchResult {
                title: "B".into(),
                url: "https://en.wikipedia.org/wiki/B".into(),
                description: String::new(),
                extra_snippets: vec![],
                page_age: None,
                age: None,
                content: None,
            },
        ];
        prioritize_wikipedia(&mut results);
        assert_eq!(results[0].title, "B");
    }

    #[test]
    fn error_markers_are_recognized() {
        assert!(is_error_content("[Error: nope]"));
        assert!(is_error_content("[Browser Error: nope]"));
        assert!(!is_error_content("plain text"));
    }
}
