//! 研究循环的单步能力：播种日志、询问研究模型、并发分发工具
//!
//! 循环本身（迭代计数、上限、状态转移、补丁合并）由 Orchestrator 的状态机驱动，
//! 这里只负责每一步与外部协作者的交互。

use std::sync::Arc;

use crate::llm::{LlmError, ModelTurn, ResearchModel};
use crate::memory::{LogEntry, MessageLog};
use crate::pipeline::prompts::{research_instruction, research_trigger};
use crate::tools::{ToolExecutor, ToolInvocation, ToolResult, ToolSpec};

/// 默认最大研究轮数（按研究模型调用次数计）
pub const DEFAULT_MAX_RESEARCH_ITERATIONS: usize = 5;

pub struct ResearchLoop {
    model: Arc<dyn ResearchModel>,
    executor: Arc<ToolExecutor>,
    instruction: String,
    max_iterations: usize,
    tool_specs: Vec<ToolSpec>,
}

impl ResearchLoop {
    pub fn new(model: Arc<dyn ResearchModel>, executor: Arc<ToolExecutor>) -> Self {
        let tool_specs = executor.specs();
        Self {
            model,
            executor,
            instruction: research_instruction(),
            max_iterations: DEFAULT_MAX_RESEARCH_ITERATIONS,
            tool_specs,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// 每次运行只播种一次：固定指令 + 视觉报告触发内容
    pub fn seed(&self, vision_report: &str) -> Vec<LogEntry> {
        vec![
            LogEntry::system(self.instruction.clone()),
            LogEntry::user(research_trigger(vision_report)),
        ]
    }

    /// 以当前日志询问研究模型一次
    pub async fn think(&self, log: &MessageLog) -> Result<ModelTurn, LlmError> {
        self.model.research(log, &self.tool_specs).await
    }

    /// 并发执行本轮全部调用并汇合；结果按调用顺序、带回各自 callId
    pub async fn dispatch(&self, calls: &[ToolInvocation]) -> Vec<ToolResult> {
        self.executor.dispatch_all(calls).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedResearchModel;
    use crate::tools::ToolRegistry;
    use serde_json::json;

    fn research_loop(model: ScriptedResearchModel) -> ResearchLoop {
        let executor = Arc::new(ToolExecutor::new(ToolRegistry::new(), 5));
        ResearchLoop::new(Arc::new(model), executor)
    }

    #[test]
    fn test_seed_is_system_then_user() {
        let rl = research_loop(ScriptedResearchModel::new(vec![]));
        let seed = rl.seed("鸡蛋,西红柿");
        assert_eq!(seed.len(), 2);
        assert!(matches!(&seed[0], LogEntry::System { .. }));
        match &seed[1] {
            LogEntry::User { content } => assert!(content.contains("鸡蛋,西红柿")),
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[test]
    fn test_max_iterations_at_least_one() {
        let rl = research_loop(ScriptedResearchModel::new(vec![])).with_max_iterations(0);
        assert_eq!(rl.max_iterations(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool_yields_error_result() {
        let rl = research_loop(ScriptedResearchModel::new(vec![]));
        let calls = [ToolInvocation::new("c1", "missing", json!({}))];
        let results = rl.dispatch(&calls).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_error());
        assert_eq!(results[0].call_id, "c1");
    }
}
