//! 编排过程事件：供控制台展示 plan / action / observe / output 与恢复动作

use serde::Serialize;

use crate::core::LoopState;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 当前任务第几步
    StepUpdate { step: usize, max_steps: usize },
    /// 循环状态变化
    State { state: LoopState },
    /// 正在调用 LLM
    Thinking,
    /// plan / continue / observe 的说明内容
    Plan {
        kind: String,
        content: String,
        next_action: Option<String>,
    },
    /// 调用工具
    ToolCall {
        tool: String,
        input: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 任务最终结果
    Output {
        content: String,
        follow_up: Option<String>,
    },
    /// 上下文被压缩
    Compacted { before: usize, after: usize },
    /// 错误恢复动作（RetryWithPrompt / Retry / Abort）
    Recovery { action: String, detail: String },
    /// Token 使用统计（累计）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
    /// 错误
    Error { text: String },
}
