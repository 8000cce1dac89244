//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithPrompt / Retry / Abort。
//! 可恢复错误（工具、进程、摘要）在各自边界内转为字符串 Observation，只有协议重试耗尽与致命错误会冒泡到循环之外。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 模型输出无法解析为合法 Step（JSON 错误或缺少必需字段）
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Protocol retries exhausted after {attempts} attempts: {last_error}")]
    ProtocolRetriesExhausted { attempts: usize, last_error: String },

    #[error("Tool '{0}' not found")]
    UnknownTool(String),

    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM request timed out after {0}s")]
    LlmTimeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 附带一次性提示重新请求模型（不写入 Transcript）
    RetryWithPrompt(String),
    /// 原样重试本轮请求
    Retry,
    /// 终止当前任务
    Abort,
}
