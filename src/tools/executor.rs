//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时。`dispatch_all` 并发执行同一轮的全部 ToolInvocation，
//! 汇合（join）后按调用顺序返回 ToolResult，每个结果带回原始 callId；失败与超时都被收敛为
//! 带错误的 ToolResult，不会中断研究循环。每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::time::timeout;

use crate::tools::{ToolInvocation, ToolRegistry, ToolResult, ToolSpec};

/// 工具执行器：对每次调用施加超时，并把结果关联回 callId
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行单个调用；超时或工具报错都转为错误结果
    pub async fn execute(&self, invocation: &ToolInvocation) -> ToolResult {
        let start = Instant::now();
        let result = timeout(
            self.timeout,
            self.registry
                .execute(&invocation.name, invocation.arguments.clone()),
        )
        .await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": invocation.name,
            "call_id": invocation.call_id,
            "ok": outcome == "ok",
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&invocation.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => ToolResult::payload(invocation, content),
            Ok(Err(e)) => ToolResult::error(invocation, e),
            Err(_) => ToolResult::error(
                invocation,
                format!("Tool {} timed out after {}s", invocation.name, self.timeout.as_secs()),
            ),
        }
    }

    /// 并发执行一轮的全部调用，等待全部完成后返回；结果顺序与调用顺序一致
    pub async fn dispatch_all(&self, invocations: &[ToolInvocation]) -> Vec<ToolResult> {
        join_all(invocations.iter().map(|inv| self.execute(inv))).await
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
