//! 流水线有限状态机
//!
//! 顶层：START → VISION → GATE → {ANALYSIS | END}；ANALYSIS 内部展开为
//! RESEARCHING ⇄ TOOL_EXEC → SUMMARIZING → PERSISTING → END。
//! `transition` 是纯函数，编排器只负责产出事件并执行对应阶段。

use serde::Serialize;

use crate::core::PipelineError;

/// 流水线所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Vision,
    Gate,
    Researching,
    ToolExec,
    Summarizing,
    Persisting,
    End,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        self == Stage::End
    }
}

/// 阶段执行完毕后产生的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Begin,
    /// 感知模型给出了合法的 VisionAssessment
    Assessed,
    ImageValid,
    ImageInvalid,
    /// 研究模型请求了至少一个工具
    ToolsRequested,
    /// 本轮所有工具结果已汇合
    ToolsJoined,
    /// 研究模型给出了纯文本结论
    Findings,
    /// 研究循环超过迭代上限
    BudgetExceeded,
    Summarized,
    /// Summarizer 输出无法解码
    Malformed,
    /// 持久化尝试结束（无论成败）
    PersistAttempted,
}

impl Event {
    fn name(self) -> &'static str {
        match self {
            Event::Begin => "begin",
            Event::Assessed => "assessed",
            Event::ImageValid => "image_valid",
            Event::ImageInvalid => "image_invalid",
            Event::ToolsRequested => "tools_requested",
            Event::ToolsJoined => "tools_joined",
            Event::Findings => "findings",
            Event::BudgetExceeded => "budget_exceeded",
            Event::Summarized => "summarized",
            Event::Malformed => "malformed",
            Event::PersistAttempted => "persist_attempted",
        }
    }
}

/// 纯转移函数 `(state, event) → nextState`；不被接受的组合返回 IllegalTransition
pub fn transition(from: Stage, event: Event) -> Result<Stage, PipelineError> {
    let next = match (from, event) {
        (Stage::Start, Event::Begin) => Stage::Vision,
        (Stage::Vision, Event::Assessed) => Stage::Gate,
        (Stage::Gate, Event::ImageValid) => Stage::Researching,
        (Stage::Gate, Event::ImageInvalid) => Stage::End,
        (Stage::Researching, Event::ToolsRequested) => Stage::ToolExec,
        (Stage::Researching, Event::Findings) => Stage::Summarizing,
        (Stage::Researching, Event::BudgetExceeded) => Stage::End,
        (Stage::ToolExec, Event::ToolsJoined) => Stage::Researching,
        (Stage::Summarizing, Event::Summarized) => Stage::Persisting,
        (Stage::Summarizing, Event::Malformed) => Stage::End,
        (Stage::Persisting, Event::PersistAttempted) => Stage::End,
        _ => {
            return Err(PipelineError::IllegalTransition {
                from,
                event: event.name(),
            })
        }
    };
    Ok(next)
}
