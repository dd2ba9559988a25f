//! 模型网关抽象
//!
//! 三类能力各自一个 trait：
//! - LlmClient：纯文本补全（Summarizer）
//! - VisionModel：图片 + 固定指令 → 结构化文本（由视觉阶段按 schema 校验）
//! - ResearchModel：消息日志 + 工具声明 → 纯文本结论或若干 ToolInvocation
//!
//! 超时与重试策略归各实现所有，核心流水线不做重试。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::{Message, MessageLog};
use crate::pipeline::EncodedImage;
use crate::tools::{ToolInvocation, ToolSpec};

/// 模型调用错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Response decode failed: {0}")]
    Decode(String),

    #[error("Model returned no choices")]
    EmptyResponse,

    #[error("Request build failed: {0}")]
    Request(String),
}

impl LlmError {
    /// 是否值得由客户端自行重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Transport(_) | LlmError::RateLimited { .. } => true,
            LlmError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// 研究模型单轮输出：`tool_calls` 为空即为纯文本结论
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
}

impl ModelTurn {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tools(tool_calls: Vec<ToolInvocation>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
        }
    }

    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// 纯文本补全
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 感知模型：返回原始结构化文本（JSON），由调用方做 schema 校验
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn assess(&self, image: &EncodedImage, instruction: &str) -> Result<String, LlmError>;
}

/// 可请求工具的研究模型
#[async_trait]
pub trait ResearchModel: Send + Sync {
    async fn research(&self, log: &MessageLog, tools: &[ToolSpec]) -> Result<ModelTurn, LlmError>;
}
