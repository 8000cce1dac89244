//! Mock / Scripted LLM 客户端（用于测试与无 API Key 时本地运行）
//!
//! MockLlmClient 取最后一条 User 消息，直接回显为 output step；
//! ScriptedLlmClient 按顺序返回预置输出，并记录每次收到的消息，便于断言循环行为。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(serde_json::json!({
            "step": "output",
            "content": format!("Echo from Mock: {last_user}"),
        })
        .to_string())
    }
}

/// 预置脚本客户端：每次 complete 弹出一条输出；脚本耗尽时返回 Err
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(outputs.into_iter().map(|s| Ok(s.into())).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条失败结果（模拟网络错误等）
    pub fn push_error(&self, err: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(err.into()));
        }
    }

    pub fn push_output(&self, output: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(output.into()));
        }
    }

    /// 已收到的请求（每次调用的完整消息列表）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        self.script
            .lock()
            .map_err(|_| "script lock poisoned".to_string())?
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()))
    }
}
