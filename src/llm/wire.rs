//! OpenAI 兼容 Chat Completions 线上格式（多模态内容、function tools、JSON 模式）

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub(in crate::llm) struct ChatRequest {
    pub(in crate::llm) model: String,
    pub(in crate::llm) messages: Vec<WireMessage>,
    pub(in crate::llm) temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(in crate::llm) tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(in crate::llm) parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(in crate::llm) response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
pub(in crate::llm) struct ResponseFormat {
    pub(in crate::llm) r#type: &'static str,
}

#[derive(Debug, Serialize)]
pub(in crate::llm) struct WireMessage {
    pub(in crate::llm) role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(in crate::llm) content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(in crate::llm) tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(in crate::llm) tool_calls: Option<Vec<WireToolCall>>,
}

impl WireMessage {
    pub(in crate::llm) fn text(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(in crate::llm) enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(in crate::llm) enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlContent },
}

#[derive(Debug, Serialize)]
pub(in crate::llm) struct ImageUrlContent {
    pub(in crate::llm) url: String,
}

#[derive(Debug, Clone, Serialize)]
pub(in crate::llm) struct WireTool {
    pub(in crate::llm) r#type: &'static str,
    pub(in crate::llm) function: WireToolDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub(in crate::llm) struct WireToolDefinition {
    pub(in crate::llm) name: String,
    pub(in crate::llm) description: String,
    pub(in crate::llm) parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(in crate::llm) struct WireToolCall {
    pub(in crate::llm) id: String,
    #[serde(default = "function_type")]
    pub(in crate::llm) r#type: String,
    pub(in crate::llm) function: WireToolCallFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(in crate::llm) struct WireToolCallFunction {
    pub(in crate::llm) name: String,
    /// JSON 编码的参数字符串
    #[serde(default)]
    pub(in crate::llm) arguments: String,
}

#[derive(Debug, Deserialize)]
pub(in crate::llm) struct ChatResponse {
    pub(in crate::llm) choices: Vec<Choice>,
    pub(in crate::llm) usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(in crate::llm) struct Usage {
    pub(in crate::llm) prompt_tokens: u64,
    pub(in crate::llm) completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
pub(in crate::llm) struct Choice {
    pub(in crate::llm) message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(in crate::llm) struct ResponseMessage {
    pub(in crate::llm) content: Option<String>,
    pub(in crate::llm) tool_calls: Option<Vec<WireToolCall>>,
}
