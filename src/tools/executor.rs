//! 工具执行器
//!
//! 持有只读 ToolRegistry 与全局超时，execute(tool_name, input) 在超时内调用 registry.invoke；
//! 超时也转为可读字符串。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::tools::{Tool, ToolInput, ToolRegistry};

/// 工具执行器：对每次调用施加超时，结果统一为字符串
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn execute(&self, tool_name: &str, input: ToolInput) -> String {
        let start = Instant::now();
        let input_preview = input_preview(&input);
        let result = timeout(self.timeout, self.registry.invoke(tool_name, input)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "input_preview": input_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) | Ok(Err(content)) => content,
            Err(_) => format!(
                "Tool '{}' timed out after {}s",
                tool_name,
                self.timeout.as_secs()
            ),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.resolve(name).ok()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn input_preview(input: &ToolInput) -> String {
    let s = input.to_json().to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
