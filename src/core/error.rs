//! 流水线错误类型与可恢复失败分类
//!
//! PipelineError 会从 `run()` 直接抛给调用方；FailureKind / RunError 则被收敛进 RunState.errors，
//! 调用方总能拿到结构化结果。

use serde::Serialize;
use thiserror::Error;

use crate::core::Stage;
use crate::llm::LlmError;

/// 从 `Orchestrator::run` 传播出去的错误（模型契约违例、模型调用失败、图片读取失败、取消）
#[derive(Error, Debug)]
pub enum PipelineError {
    /// 模型输出不满足结构化契约（如 VisionAssessment 字段缺失或互斥约束被破坏）
    #[error("Schema violation at {boundary}: {detail}")]
    SchemaViolation { boundary: &'static str, detail: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Run cancelled before stage {0:?}")]
    Cancelled(Stage),

    #[error("Config error: {0}")]
    Config(String),

    /// 状态机收到当前状态不接受的事件，属于编排器内部缺陷
    #[error("Illegal transition: {event} in state {from:?}")]
    IllegalTransition { from: Stage, event: &'static str },
}

impl PipelineError {
    pub fn schema(boundary: &'static str, detail: impl Into<String>) -> Self {
        Self::SchemaViolation {
            boundary,
            detail: detail.into(),
        }
    }
}

/// 在 RunState 中就地消化的失败种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 单次工具调用失败（已作为带错误的 ToolResult 回灌给研究模型）
    ToolInvocationFailure,
    /// Summarizer 输出无法解码为 NutritionRecord
    MalformedRecord,
    /// 存储协作者保存失败
    PersistenceFailure,
    /// 研究循环超过迭代上限
    LoopBudgetExceeded,
}

/// RunState.errors 的一条记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunError {
    pub kind: FailureKind,
    pub message: String,
}

impl RunError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}
