//! 研究循环消息日志
//!
//! 只追加：每次运行以固定指令 + 触发内容播种一次，之后每轮追加模型回复与工具结果，
//! 既有条目在运行期内不会被改写或删除。

use serde::Serialize;

use crate::tools::{ToolInvocation, ToolResult};

/// 日志条目：system / user / model / tool-result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum LogEntry {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Model {
        content: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolInvocation>,
    },
    ToolResult(ToolResult),
}

impl LogEntry {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>, tool_calls: Vec<ToolInvocation>) -> Self {
        Self::Model {
            content: content.into(),
            tool_calls,
        }
    }
}

/// 只追加的有序日志
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// 合并语义：拼接，不替换
    pub fn extend(&mut self, entries: impl IntoIterator<Item = LogEntry>) {
        self.entries.extend(entries);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 所有工具结果
    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.entries.iter().filter_map(|e| match e {
            LogEntry::ToolResult(r) => Some(r),
            _ => None,
        })
    }

    /// 尚未收到结果的工具调用（正常情况下每轮汇合后应为空）
    pub fn unanswered_calls(&self) -> Vec<&ToolInvocation> {
        let answered: std::collections::HashSet<&str> =
            self.tool_results().map(|r| r.call_id.as_str()).collect();
        self.entries
            .iter()
            .filter_map(|e| match e {
                LogEntry::Model { tool_calls, .. } => Some(tool_calls.iter()),
                _ => None,
            })
            .flatten()
            .filter(|c| !answered.contains(c.call_id.as_str()))
            .collect()
    }
}
