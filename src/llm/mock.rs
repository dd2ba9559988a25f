//! Mock 模型（用于测试与无 API Key 时的本地演示）
//!
//! - StaticVisionModel：固定返回一段结构化文本
//! - ScriptedResearchModel：按脚本逐轮返回 ModelTurn，脚本耗尽后重复最后一轮
//! - ScriptedLlmClient：按脚本逐次返回文本，耗尽后重复最后一条

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{LlmClient, LlmError, ModelTurn, ResearchModel, VisionModel};
use crate::memory::{Message, MessageLog};
use crate::pipeline::EncodedImage;
use crate::tools::{ToolInvocation, ToolSpec};

/// 固定输出的感知模型
#[derive(Debug)]
pub struct StaticVisionModel {
    raw: String,
    calls: AtomicUsize,
}

impl StaticVisionModel {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn valid(report: &str) -> Self {
        Self::new(json!({"is_valid": true, "reason": "", "report": report}).to_string())
    }

    pub fn invalid(reason: &str) -> Self {
        Self::new(json!({"is_valid": false, "reason": reason, "report": ""}).to_string())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionModel for StaticVisionModel {
    async fn assess(&self, _image: &EncodedImage, _instruction: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.raw.clone())
    }
}

/// 脚本化研究模型
#[derive(Debug)]
pub struct ScriptedResearchModel {
    script: Mutex<VecDeque<ModelTurn>>,
    last: Mutex<Option<ModelTurn>>,
    calls: AtomicUsize,
}

impl ScriptedResearchModel {
    pub fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// `tool_turns` 轮各请求一次 `tool`，之后给出纯文本结论
    pub fn tools_then_findings(tool: &str, tool_turns: usize, findings: &str) -> Self {
        let mut turns: Vec<ModelTurn> = (0..tool_turns)
            .map(|i| {
                ModelTurn::tools(vec![ToolInvocation::new(
                    format!("call_{}", i),
                    tool,
                    json!({"query": format!("query {}", i)}),
                )])
            })
            .collect();
        turns.push(ModelTurn::content(findings));
        Self::new(turns)
    }

    /// 永远请求工具（用于验证迭代上限）
    pub fn always_tool(tool: &str) -> Self {
        Self::new(vec![ModelTurn::tools(vec![ToolInvocation::new(
            "call_loop",
            tool,
            json!({"query": "loop"}),
        )])])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResearchModel for ScriptedResearchModel {
    async fn research(&self, _log: &MessageLog, _tools: &[ToolSpec]) -> Result<ModelTurn, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .map_err(|e| LlmError::Transport(e.to_string()))?
            .pop_front();
        let mut last = self
            .last
            .lock()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        let mut turn = match next {
            Some(turn) => {
                *last = Some(turn.clone());
                turn
            }
            None => last.clone().ok_or(LlmError::EmptyResponse)?,
        };
        // 重复回放时让 callId 保持唯一
        for call in &mut turn.tool_calls {
            if call.call_id == "call_loop" {
                call.call_id = format!("call_loop_{}", n);
            }
        }
        Ok(turn)
    }
}

/// 脚本化纯文本模型；脚本耗尽后重复最后一条
#[derive(Debug)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn single(reply: impl Into<String>) -> Self {
        Self::new(vec![reply.into()])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .replies
            .lock()
            .map_err(|e| LlmError::Transport(e.to_string()))?
            .pop_front();
        let mut last = self
            .last
            .lock()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                Ok(reply)
            }
            None => last.clone().ok_or(LlmError::EmptyResponse),
        }
    }
}

/// 无 API Key 时的演示输出：西红柿炒鸡蛋
pub fn demo_record_json() -> String {
    json!({
        "dish_name": "西红柿炒鸡蛋",
        "main_ingredients": ["西红柿", "鸡蛋"],
        "seasonings": ["盐", "植物油", "白糖"],
        "feature_tags": ["家常味", "快炒"],
        "description": "酸甜家常快手菜",
        "pagoda_nutrition_vector": {
            "L1": {"total_value": 0, "ingredients": [], "details": {"grains": 0, "tubers": 0}},
            "L2": {"total_value": 200, "ingredients": ["西红柿"], "details": {"vegetables": 200, "fruits": 0}},
            "L3": {"total_value": 100, "ingredients": ["鸡蛋"], "details": {"animal_meat": 0, "seafood": 0, "eggs": 100}},
            "L4": {"total_value": 0, "ingredients": [], "details": {"dairy": 0, "soy_nuts": 0}},
            "L5": {"oil": 15, "salt": 3}
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_research_repeats_last_turn() {
        let model = ScriptedResearchModel::always_tool("search");
        let log = MessageLog::new();
        let a = model.research(&log, &[]).await.unwrap();
        let b = model.research(&log, &[]).await.unwrap();
        assert!(a.requests_tools() && b.requests_tools());
        assert_ne!(a.tool_calls[0].call_id, b.tool_calls[0].call_id);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_llm_repeats_last_reply() {
        let llm = ScriptedLlmClient::new(vec!["one".to_string(), "two".to_string()]);
        assert_eq!(llm.complete(&[]).await.unwrap(), "one");
        assert_eq!(llm.complete(&[]).await.unwrap(), "two");
        assert_eq!(llm.complete(&[]).await.unwrap(), "two");
        assert_eq!(llm.calls(), 3);

        let empty = ScriptedLlmClient::new(vec![]);
        assert!(matches!(empty.complete(&[]).await, Err(LlmError::EmptyResponse)));
    }
}
