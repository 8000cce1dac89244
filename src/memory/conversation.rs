//! 短期记忆：对话 Transcript
//!
//! 第一条永远是唯一的 system 消息，不会被剪枝或摘要掉；其余按时间顺序追加。
//! Transcript 只由编排循环持有和修改，压缩器拿到的是副本并返回替换品。

use serde::{Deserialize, Serialize};

/// 消息角色；Tool 表示工具层返回的真实结果，与模型自身推理区分
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 是否为压缩生成的对话摘要
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub summary: bool,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            summary: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// 工具结果：包装为 {"step": "observe", "content": ...}，与模型的 step 格式保持一致
    pub fn observation(result: &str) -> Self {
        let content = serde_json::json!({ "step": "observe", "content": result }).to_string();
        Self::new(Role::Tool, content)
    }

    /// 压缩摘要（assistant 角色，带 summary 标记）
    pub fn conversation_summary(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: format!("[Conversation summary]\n{}", text.into()),
            summary: true,
        }
    }
}

/// 对话 Transcript：system 消息固定在首位
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// 初始状态：system + 一条 user（初始任务）
    pub fn new(system_prompt: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt), Message::user(task)],
        }
    }

    /// 由 system + 其余消息重建；`rest` 中的 system 消息会被拒绝
    pub(crate) fn from_parts(system: Message, rest: Vec<Message>) -> Self {
        let mut messages = Vec::with_capacity(rest.len() + 1);
        messages.push(system);
        messages.extend(rest.into_iter().filter(|m| m.role != Role::System));
        Self { messages }
    }

    /// 拆为 system 与其余消息（压缩时使用）
    pub(crate) fn into_parts(self) -> (Message, Vec<Message>) {
        let mut messages = self.messages.into_iter();
        let system = messages
            .next()
            .unwrap_or_else(|| Message::system(String::new()));
        (system, messages.collect())
    }

    pub fn system(&self) -> &Message {
        &self.messages[0]
    }

    pub fn push(&mut self, msg: Message) {
        if msg.role == Role::System {
            tracing::warn!("ignoring extra system message; the transcript keeps a single system entry");
            return;
        }
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 发给 LLM 的消息；`hint` 为一次性追加的提示（协议重试时使用），不写回 Transcript
    pub fn to_llm_messages(&self, hint: Option<&str>) -> Vec<Message> {
        let mut out = self.messages.clone();
        if let Some(h) = hint {
            out.push(Message::user(h));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transcript_seeds_system_and_task() {
        let t = Transcript::new("persona", "build a todo app");
        assert_eq!(t.len(), 2);
        assert_eq!(t.system().role, Role::System);
        assert_eq!(t.messages()[1], Message::user("build a todo app"));
    }

    #[test]
    fn test_push_rejects_second_system() {
        let mut t = Transcript::new("persona", "task");
        t.push(Message::system("another persona"));
        assert_eq!(t.len(), 2);
        assert_eq!(t.system().content, "persona");
    }

    #[test]
    fn test_observation_is_tool_role_json() {
        let m = Message::observation("Server 'dev' stopped successfully");
        assert_eq!(m.role, Role::Tool);
        let v: serde_json::Value = serde_json::from_str(&m.content).unwrap();
        assert_eq!(v["step"], "observe");
        assert_eq!(v["content"], "Server 'dev' stopped successfully");
    }

    #[test]
    fn test_hint_is_not_persisted() {
        let t = Transcript::new("persona", "task");
        let msgs = t.to_llm_messages(Some("reply with JSON"));
        assert_eq!(msgs.len(), 3);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_from_parts_keeps_single_system() {
        let t = Transcript::from_parts(
            Message::system("s"),
            vec![Message::system("x"), Message::user("u")],
        );
        assert_eq!(t.len(), 2);
        assert_eq!(t.messages()[1].role, Role::User);
    }
}
