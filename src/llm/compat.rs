//! OpenAI 兼容 HTTP 客户端（reqwest）
//!
//! 覆盖 async_openai 文本补全之外的两类调用：
//! - 视觉：user 消息携带 image_url（data URI），`response_format = json_object`
//! - 研究：携带 function tools，`parallel_tool_calls = true`，把 MessageLog 按 callId 还原为
//!   assistant.tool_calls / tool 消息
//!
//! 超时由 reqwest Client 负责；429 / 5xx / 网络错误按 RetryConfig 指数退避重试。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::wire::{
    ChatRequest, ChatResponse, ContentPart, ImageUrlContent, MessageContent, ResponseFormat,
    WireMessage, WireTool, WireToolCall, WireToolCallFunction, WireToolDefinition,
};
use crate::llm::{LlmClient, LlmError, ModelTurn, ResearchModel, TokenUsage, VisionModel};
use crate::memory::{LogEntry, Message, MessageLog, Role};
use crate::pipeline::EncodedImage;
use crate::tools::{ToolInvocation, ToolSpec};

/// 视觉调用附带的用户文本
const VISION_USER_TEXT: &str = "分析图中菜品信息";

/// 客户端侧重试策略
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
        }
    }
}

/// OpenAI 兼容端点客户端；每个实例绑定一个模型
pub struct CompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    retry: RetryConfig,
    pub usage: TokenUsage,
}

impl CompatClient {
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: 0.0,
            retry: RetryConfig::default(),
            usage: TokenUsage::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, messages: Vec<WireMessage>) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            tools: None,
            parallel_tool_calls: None,
            response_format: None,
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match self.send_once(request).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let backoff = match &e {
                        LlmError::RateLimited { retry_after_ms } => *retry_after_ms,
                        _ => self.retry.base_delay_ms.saturating_mul(1 << attempt),
                    };
                    tracing::warn!(
                        model = %self.model,
                        attempt = attempt + 1,
                        backoff_ms = backoff,
                        error = %e,
                        "llm request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after_ms = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(self.retry.base_delay_ms);
            return Err(LlmError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        if let Some(usage) = &parsed.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }
        Ok(parsed)
    }
}

fn first_message(resp: ChatResponse) -> Result<crate::llm::wire::ResponseMessage, LlmError> {
    resp.choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or(LlmError::EmptyResponse)
}

/// 把只追加日志还原为 Chat Completions 消息序列
pub(in crate::llm) fn log_to_wire(log: &MessageLog) -> Vec<WireMessage> {
    log.entries()
        .iter()
        .map(|entry| match entry {
            LogEntry::System { content } => WireMessage::text("system", content.clone()),
            LogEntry::User { content } => WireMessage::text("user", content.clone()),
            LogEntry::Model {
                content,
                tool_calls,
            } => WireMessage {
                role: "assistant",
                content: if content.is_empty() {
                    None
                } else {
                    Some(MessageContent::Text(content.clone()))
                },
                tool_call_id: None,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls.iter().map(invocation_to_wire).collect())
                },
            },
            LogEntry::ToolResult(result) => WireMessage {
                role: "tool",
                content: Some(MessageContent::Text(result.content_for_model())),
                tool_call_id: Some(result.call_id.clone()),
                tool_calls: None,
            },
        })
        .collect()
}

fn invocation_to_wire(call: &ToolInvocation) -> WireToolCall {
    WireToolCall {
        id: call.call_id.clone(),
        r#type: "function".to_string(),
        function: WireToolCallFunction {
            name: call.name.clone(),
            arguments: call.arguments.to_string(),
        },
    }
}

/// 模型给出的 arguments 是 JSON 字符串；解析失败时保留原文交给工具报错
pub(in crate::llm) fn wire_to_invocation(call: WireToolCall) -> ToolInvocation {
    let raw = call.function.arguments.trim();
    let arguments = if raw.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
    };
    let call_id = if call.id.is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        call.id
    };
    ToolInvocation {
        call_id,
        name: call.function.name,
        arguments,
    }
}

fn tools_to_wire(tools: &[ToolSpec]) -> Option<Vec<WireTool>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| WireTool {
                r#type: "function",
                function: WireToolDefinition {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect(),
    )
}

#[async_trait]
impl VisionModel for CompatClient {
    async fn assess(&self, image: &EncodedImage, instruction: &str) -> Result<String, LlmError> {
        let mut request = self.request(vec![
            WireMessage::text("system", instruction),
            WireMessage {
                role: "user",
                content: Some(MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: VISION_USER_TEXT.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrlContent {
                            url: image.data_url.clone(),
                        },
                    },
                ])),
                tool_call_id: None,
                tool_calls: None,
            },
        ]);
        request.response_format = Some(ResponseFormat {
            r#type: "json_object",
        });
        let message = first_message(self.send(&request).await?)?;
        Ok(message.content.unwrap_or_default())
    }
}

#[async_trait]
impl ResearchModel for CompatClient {
    async fn research(&self, log: &MessageLog, tools: &[ToolSpec]) -> Result<ModelTurn, LlmError> {
        let mut request = self.request(log_to_wire(log));
        request.tools = tools_to_wire(tools);
        if request.tools.is_some() {
            request.parallel_tool_calls = Some(true);
        }
        let message = first_message(self.send(&request).await?)?;
        Ok(ModelTurn {
            content: message.content.unwrap_or_default(),
            tool_calls: message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(wire_to_invocation)
                .collect(),
        })
    }
}

#[async_trait]
impl LlmClient for CompatClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let wire = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                WireMessage::text(role, m.content.clone())
            })
            .collect();
        let message = first_message(self.send(&self.request(wire)).await?)?;
        Ok(message.content.unwrap_or_default())
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResult;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_image() -> EncodedImage {
        EncodedImage {
            mime: "image/png".to_string(),
            data_url: "data:image/png;base64,AAAA".to_string(),
        }
    }

    #[test]
    fn test_log_to_wire_keeps_call_ids() {
        let call = ToolInvocation::new("call_9", "tavily_search_results_json", json!({"query": "q"}));
        let mut log = MessageLog::new();
        log.push(LogEntry::system("sys"));
        log.push(LogEntry::model("", vec![call.clone()]));
        log.push(LogEntry::ToolResult(ToolResult::error(&call, "timeout")));

        let wire = serde_json::to_value(log_to_wire(&log)).unwrap();
        assert_eq!(wire[1]["role"], "assistant");
        assert_eq!(wire[1]["tool_calls"][0]["id"], "call_9");
        assert_eq!(wire[1]["tool_calls"][0]["function"]["arguments"], "{\"query\":\"q\"}");
        assert!(wire[1].get("content").is_none());
        assert_eq!(wire[2]["role"], "tool");
        assert_eq!(wire[2]["tool_call_id"], "call_9");
        assert_eq!(wire[2]["content"], "Error: timeout");
    }

    #[test]
    fn test_wire_to_invocation_parses_arguments() {
        let inv = wire_to_invocation(WireToolCall {
            id: String::new(),
            r#type: "function".to_string(),
            function: WireToolCallFunction {
                name: "search".to_string(),
                arguments: "{\"query\":\"宫保鸡丁 盐\"}".to_string(),
            },
        });
        assert!(inv.call_id.starts_with("call_"));
        assert_eq!(inv.arguments["query"], "宫保鸡丁 盐");
    }

    #[tokio::test]
    async fn test_research_returns_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"parallel_tool_calls": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": null, "tool_calls": [
                    {"id": "call_a", "type": "function",
                     "function": {"name": "search", "arguments": "{\"query\":\"x\"}"}},
                    {"id": "call_b", "type": "function",
                     "function": {"name": "search", "arguments": "{\"query\":\"y\"}"}}
                ]}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5}
            })))
            .mount(&server)
            .await;

        let client = CompatClient::new(&server.uri(), "qwen-plus", "sk-test", 5);
        let mut log = MessageLog::new();
        log.push(LogEntry::user("hi"));
        let tools = vec![ToolSpec {
            name: "search".to_string(),
            description: "d".to_string(),
            parameters: json!({"type": "object"}),
        }];
        let turn = client.research(&log, &tools).await.unwrap();
        assert_eq!(turn.tool_calls.len(), 2);
        assert_eq!(turn.tool_calls[1].call_id, "call_b");
        assert_eq!(client.token_usage(), (10, 5, 15));
    }

    #[tokio::test]
    async fn test_vision_requests_json_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "{\"is_valid\":true,\"reason\":\"\",\"report\":\"饺子\"}"}}]
            })))
            .mount(&server)
            .await;

        let client = CompatClient::new(&server.uri(), "qwen3-vl-plus", "sk-test", 5);
        let raw = client.assess(&sample_image(), "instr").await.unwrap();
        assert!(raw.contains("饺子"));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let client = CompatClient::new(&server.uri(), "m", "k", 5);
        let err = client.complete(&[Message::user("x")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = CompatClient::new(&server.uri(), "m", "k", 5).with_retry(RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
        });
        let err = client.complete(&[Message::user("x")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Status { status: 503, .. }));
    }
}
