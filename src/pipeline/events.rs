//! 流水线过程事件：供 CLI / Web 展示阶段进度、工具调用与结果预览

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::Stage;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// 进入阶段
    StageEntered { thread_id: String, stage: Stage },
    /// 研究循环第几轮
    LoopIteration { iteration: usize, max_iterations: usize },
    /// 调用工具
    ToolCall {
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        call_id: String,
        tool: String,
        ok: bool,
        preview: String,
    },
    /// 运行结束
    Finished {
        thread_id: String,
        save_status: Option<bool>,
        error_count: usize,
    },
}

/// 发送事件；接收端已关闭时静默忽略
pub fn send_event(tx: Option<&mpsc::UnboundedSender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}

/// 截断预览文本（按字符）
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let ev = PipelineEvent::StageEntered {
            thread_id: "t1".to_string(),
            stage: Stage::Vision,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "stage_entered");
        assert_eq!(v["stage"], "vision");
    }

    #[test]
    fn test_send_event_ignores_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        send_event(Some(&tx), PipelineEvent::LoopIteration { iteration: 1, max_iterations: 5 });
        send_event(None, PipelineEvent::LoopIteration { iteration: 1, max_iterations: 5 });
    }

    #[test]
    fn test_preview_truncates_by_char() {
        assert_eq!(preview("西红柿炒鸡蛋", 3), "西红柿...");
        assert_eq!(preview("abc", 3), "abc");
    }
}
