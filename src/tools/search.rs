//! 联网搜索工具：Tavily Search API
//!
//! POST `{query, max_results}`，只保留每条结果的 url 与 content，压缩成 JSON 数组回灌给研究模型；
//! 超过 max_result_chars 时截断并追加 ...[truncated]。

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::Tool;

pub const SEARCH_TOOL_NAME: &str = "tavily_search_results_json";

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SearchHit {
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Tavily 搜索工具；超时、条数与最大字符数由配置决定
pub struct SearchTool {
    client: Client,
    endpoint: String,
    api_key: String,
    max_results: usize,
    max_result_chars: usize,
}

impl SearchTool {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        max_results: usize,
        timeout_secs: u64,
        max_result_chars: usize,
    ) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("TAVILY_API_KEY").ok())
            .unwrap_or_default();
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            max_results,
            max_result_chars,
        }
    }

    async fn search(&self, query: &str) -> Result<String, String> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&SearchRequest {
                query,
                max_results: self.max_results,
            })
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| format!("Read body: {}", e))?;
        let compact = serde_json::to_string(&body.results).map_err(|e| e.to_string())?;
        Ok(truncate(compact, self.max_result_chars))
    }
}

fn truncate(body: String, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        body.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        body
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "A search engine optimized for comprehensive, accurate results. Use it to look up typical recipes, ingredient weights and oil/salt usage of a dish. Input should be a search query."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "search query"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        tracing::info!(query = %query, "search tool query");
        self.search(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_search_returns_compact_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("authorization", "Bearer tvly-test"))
            .and(body_json(json!({"query": "番茄炒蛋 用油量", "max_results": 3})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": "番茄炒蛋 用油量",
                "results": [
                    {"title": "t", "url": "https://a.example/1", "content": "植物油 15 克", "score": 0.9},
                    {"title": "t", "url": "https://a.example/2", "content": "盐 3 克", "score": 0.8}
                ]
            })))
            .mount(&server)
            .await;

        let tool = SearchTool::new(
            format!("{}/search", server.uri()),
            Some("tvly-test".to_string()),
            3,
            5,
            8000,
        );
        let out = tool.execute(json!({"query": "番茄炒蛋 用油量"})).await.unwrap();
        let hits: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(hits.as_array().unwrap().len(), 2);
        assert_eq!(hits[0]["url"], "https://a.example/1");
        assert!(hits[0].get("score").is_none());
    }

    #[tokio::test]
    async fn test_search_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let tool = SearchTool::new(server.uri(), Some("bad".to_string()), 3, 5, 8000);
        let err = tool.execute(json!({"query": "x"})).await.unwrap_err();
        assert!(err.contains("401"));
        assert_eq!(tool.execute(json!({})).await.unwrap_err(), "Missing query");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef".to_string(), 3), "abc\n...[truncated]");
        assert_eq!(truncate("abc".to_string(), 3), "abc");
    }
}
