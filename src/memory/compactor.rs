//! Context Compaction
//!
//! 条数（或估算 token）超过阈值时，把 Transcript 压成 system + 摘要 + 最近一条。
//! 摘要由 Summarizer 生成（通常是一次 LLM 调用）；失败或为空时用固定占位摘要，压缩永远不会中断任务。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::CompactionSection;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{Message, Role, TokenEstimator, Transcript};

/// 摘要失败时使用的占位摘要
pub const FALLBACK_SUMMARY: &str = "Earlier steps of this session were compacted and their details are unavailable. \
Re-check the project files and running servers (list_servers) before relying on previous results.";

const SUMMARY_INSTRUCTIONS: &str = "You compress the history of a coding-assistant session. \
Write a concise plain-text summary that keeps: what was built or changed (files, directories), \
key decisions and user requests, and the current project state (project path and type, servers started or stopped, \
known errors). Do not invent facts. Do not answer in JSON.";

/// 摘要生成器
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message]) -> Result<String, AgentError>;
}

/// 用 LLM 生成摘要
pub struct LlmSummarizer {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LlmClient>, timeout_secs: u64) -> Self {
        Self {
            llm,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

fn render_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            format!("{}: {}", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String, AgentError> {
        let request = vec![
            Message::system(SUMMARY_INSTRUCTIONS),
            Message::user(format!(
                "Summarize this conversation history:\n\n{}",
                render_history(messages)
            )),
        ];
        match tokio::time::timeout(self.timeout, self.llm.complete(&request)).await {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(e)) => Err(AgentError::Summarization(e)),
            Err(_) => Err(AgentError::Summarization(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// 上下文压缩器：只接收 Transcript 的所有权并返回替换品，不修改循环持有的实例
pub struct ContextCompactor {
    summarizer: Arc<dyn Summarizer>,
    max_entries: usize,
    max_tokens: Option<usize>,
    summary_max_chars: usize,
}

impl ContextCompactor {
    /// max_entries 至少为 3（system + 摘要 + 最近一条）
    pub fn new(summarizer: Arc<dyn Summarizer>, max_entries: usize) -> Self {
        Self {
            summarizer,
            max_entries: max_entries.max(3),
            max_tokens: None,
            summary_max_chars: 2000,
        }
    }

    pub fn from_config(summarizer: Arc<dyn Summarizer>, cfg: &CompactionSection) -> Self {
        Self::new(summarizer, cfg.max_entries)
            .with_max_tokens(cfg.max_tokens)
            .with_summary_max_chars(cfg.summary_max_chars)
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_summary_max_chars(mut self, chars: usize) -> Self {
        self.summary_max_chars = chars.max(1);
        self
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn needs_compaction(&self, transcript: &Transcript) -> bool {
        if transcript.len() < 3 {
            return false;
        }
        // 中间只剩一条摘要时，再压缩也不会变短
        if transcript.len() == 3 && transcript.messages()[1].summary {
            return false;
        }
        transcript.len() > self.max_entries
            || self
                .max_tokens
                .is_some_and(|max| TokenEstimator::estimate_messages(transcript.messages()) > max)
    }

    /// 未超过阈值时原样返回
    pub async fn maybe_compact(&self, transcript: Transcript) -> Transcript {
        if self.needs_compaction(&transcript) {
            self.compact(transcript).await
        } else {
            transcript
        }
    }

    /// 无条件压缩为 system + 摘要 + 最近一条（不足 3 条时原样返回）
    pub async fn compact(&self, transcript: Transcript) -> Transcript {
        if transcript.len() < 3 {
            return transcript;
        }
        let before = transcript.len();
        let (system, mut rest) = transcript.into_parts();
        let Some(latest) = rest.pop() else {
            return Transcript::from_parts(system, rest);
        };

        let summary = match self.summarizer.summarize(&rest).await {
            Ok(s) if !s.trim().is_empty() => truncate_chars(s.trim(), self.summary_max_chars),
            Ok(_) => {
                tracing::warn!("summarizer returned an empty summary, using placeholder");
                FALLBACK_SUMMARY.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "summarization failed, using placeholder");
                FALLBACK_SUMMARY.to_string()
            }
        };

        tracing::info!(before, summarized = rest.len(), "context compacted");
        Transcript::from_parts(system, vec![Message::conversation_summary(summary), latest])
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    struct FixedSummarizer(Result<String, String>);

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _messages: &[Message]) -> Result<String, AgentError> {
            self.0.clone().map_err(AgentError::Summarization)
        }
    }

    fn transcript_with(n: usize) -> Transcript {
        let mut t = Transcript::new("persona", "task");
        while t.len() < n {
            let i = t.len();
            t.push(Message::assistant(format!("{{\"step\":\"plan\",\"content\":\"{}\"}}", i)));
        }
        t
    }

    #[tokio::test]
    async fn test_below_threshold_untouched() {
        let compactor =
            ContextCompactor::new(Arc::new(FixedSummarizer(Ok("s".to_string()))), 15);
        let t = transcript_with(15);
        assert_eq!(compactor.maybe_compact(t.clone()).await, t);
    }

    #[tokio::test]
    async fn test_compacts_to_three_entries() {
        let compactor =
            ContextCompactor::new(Arc::new(FixedSummarizer(Ok("built app".to_string()))), 15);
        let t = transcript_with(20);
        let latest = t.last().cloned().unwrap();
        let out = compactor.maybe_compact(t.clone()).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out.messages()[0], t.messages()[0]);
        assert!(out.messages()[1].summary);
        assert!(out.messages()[1].content.contains("built app"));
        assert_eq!(out.messages()[2], latest);
    }

    #[tokio::test]
    async fn test_failure_uses_placeholder() {
        let compactor =
            ContextCompactor::new(Arc::new(FixedSummarizer(Err("down".to_string()))), 15);
        let out = compactor.maybe_compact(transcript_with(16)).await;
        assert_eq!(out.len(), 3);
        assert!(out.messages()[1].content.contains(FALLBACK_SUMMARY));
    }

    #[tokio::test]
    async fn test_token_threshold_and_truncation() {
        let compactor = ContextCompactor::new(
            Arc::new(FixedSummarizer(Ok("x".repeat(50)))),
            100,
        )
        .with_max_tokens(Some(10))
        .with_summary_max_chars(10);
        let out = compactor.maybe_compact(transcript_with(5)).await;
        assert_eq!(out.len(), 3);
        assert!(out.messages()[1].content.ends_with(&format!("{}...", "x".repeat(10))));
    }

    struct CountingSummarizer(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(&self, _messages: &[Message]) -> Result<String, AgentError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok("again".to_string())
        }
    }

    #[tokio::test]
    async fn test_oversized_latest_after_summary_not_recompacted() {
        let summarizer = Arc::new(CountingSummarizer(Default::default()));
        let compactor =
            ContextCompactor::new(summarizer.clone(), 100).with_max_tokens(Some(10));
        let t = Transcript::from_parts(
            Message::system("persona"),
            vec![
                Message::conversation_summary("built app"),
                Message::user("y".repeat(2000)),
            ],
        );
        assert!(!compactor.needs_compaction(&t));
        for _ in 0..3 {
            assert_eq!(compactor.maybe_compact(t.clone()).await, t);
        }
        assert_eq!(summarizer.0.load(std::sync::atomic::Ordering::SeqCst), 0);

        // 中间是普通条目时仍按 token 阈值压缩
        let plain = Transcript::from_parts(
            Message::system("persona"),
            vec![Message::assistant("z".repeat(200)), Message::user("y".repeat(2000))],
        );
        assert!(compactor.needs_compaction(&plain));
    }

    #[tokio::test]
    async fn test_llm_summarizer_errors_are_summarization_errors() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
        let summarizer = LlmSummarizer::new(llm, 5);
        let err = summarizer.summarize(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, AgentError::Summarization(_)));
    }
}
