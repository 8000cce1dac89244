//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供编排循环决定是带提示重试、原样重试还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Protocol(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous reply could not be parsed as a step ({raw}). \
                Reply with exactly one JSON object and nothing else, for example: \
                {{\"step\": \"plan\", \"content\": \"...\"}} or \
                {{\"step\": \"action\", \"content\": \"...\", \"function\": \"tool_name\", \"input\": \"...\"}}."
            )),
            AgentError::LlmTimeout(_) | AgentError::Llm(_) => RecoveryAction::Retry,
            _ => RecoveryAction::Abort,
        }
    }
}
