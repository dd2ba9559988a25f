//! 工具调用与结果：研究模型发出的 ToolInvocation，以 callId 关联回 ToolResult

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 研究模型请求执行的一次工具调用；`call_id` 由模型给出，结果必须原样带回
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 工具执行结果：成功载荷或错误描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Payload(String),
    Error(String),
}

/// 工具结果，按 `call_id` 与发起它的 ToolInvocation 对应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn payload(invocation: &ToolInvocation, payload: impl Into<String>) -> Self {
        Self {
            call_id: invocation.call_id.clone(),
            name: invocation.name.clone(),
            outcome: ToolOutcome::Payload(payload.into()),
        }
    }

    pub fn error(invocation: &ToolInvocation, error: impl Into<String>) -> Self {
        Self {
            call_id: invocation.call_id.clone(),
            name: invocation.name.clone(),
            outcome: ToolOutcome::Error(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error(_))
    }

    /// 回灌给模型的文本；错误以 `Error:` 前缀标注，方便模型据此调整
    pub fn content_for_model(&self) -> String {
        match &self.outcome {
            ToolOutcome::Payload(p) => p.clone(),
            ToolOutcome::Error(e) => format!("Error: {}", e),
        }
    }
}

/// 提供给研究模型的工具声明（name / description / JSON Schema 参数）
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}
