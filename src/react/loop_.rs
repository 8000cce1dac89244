//! 编排主循环
//!
//! 压缩（可选）→ LLM → parse_step → StepExecutor → 追加到 Transcript，直到 output 且不再继续、
//! 单任务步数用尽或外部取消。LLM 调用、工具调用、压缩摘要、等待用户输入都与 CancellationToken 竞争，
//! 取消后立即退出；run 在任何退出路径上都会先执行 ProcessSupervisor::drain_all 再返回。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::core::{AgentError, LoopState, RecoveryAction, RecoveryEngine, TerminationReason};
use crate::llm::LlmClient;
use crate::memory::{ContextCompactor, Message, Transcript};
use crate::process::{DrainReport, ProcessSupervisor};
use crate::react::{parse_step, ReactEvent, Step, StepExecutor, StepOutcome};

/// 连续模式下表示结束会话的回复（空串同样表示结束）
pub const EXIT_SENTINELS: &[&str] = &["quit", "exit", "done", "no", "n"];

/// 原始输出日志预览长度
const RAW_PREVIEW_CHARS: usize = 300;

pub fn is_exit_reply(reply: &str) -> bool {
    let reply = reply.trim().to_lowercase();
    reply.is_empty() || EXIT_SENTINELS.contains(&reply.as_str())
}

/// 连续模式：output 之后向用户索取新指令
#[async_trait]
pub trait UserPrompter: Send + Sync {
    /// None 表示输入已关闭（EOF），按结束处理
    async fn next_instruction(&self, output: &str, follow_up: Option<&str>) -> Option<String>;
}

/// 等待用户输入，同时响应取消；取消时返回 AgentError::Cancelled
pub async fn prompt_or_cancel(
    prompter: &dyn UserPrompter,
    cancel: &CancellationToken,
    output: &str,
    follow_up: Option<&str>,
) -> Result<Option<String>, AgentError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        reply = prompter.next_instruction(output, follow_up) => Ok(reply),
    }
}

/// 预置回复的 UserPrompter（测试与非交互运行使用）
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的 (output, follow_up)
    pub fn prompts(&self) -> Vec<(String, Option<String>)> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl UserPrompter for ScriptedPrompter {
    async fn next_instruction(&self, output: &str, follow_up: Option<&str>) -> Option<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((output.to_string(), follow_up.map(String::from)));
        }
        self.replies.lock().ok()?.pop_front()
    }
}

/// 循环参数
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// 单个任务的最大步数
    pub max_steps: usize,
    /// 单步内协议 / LLM 错误的最大重试次数
    pub max_protocol_retries: usize,
    pub llm_timeout: Duration,
    pub continuous: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_protocol_retries: 3,
            llm_timeout: Duration::from_secs(120),
            continuous: true,
        }
    }
}

impl LoopSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_steps: cfg.agent.max_steps.max(1),
            max_protocol_retries: cfg.agent.max_protocol_retries,
            llm_timeout: Duration::from_secs(cfg.llm.timeouts.request),
            continuous: cfg.app.continuous,
        }
    }
}

/// 循环结束结果
#[derive(Debug)]
pub struct LoopOutcome {
    pub reason: TerminationReason,
    /// 最近一次 output 的内容
    pub final_output: Option<String>,
    /// 全部任务累计步数
    pub steps: usize,
    /// 处理过的任务数（初始任务 + 连续模式下的新指令）
    pub tasks: usize,
    pub drain: DrainReport,
    pub transcript: Transcript,
}

struct DriveEnd {
    reason: TerminationReason,
    final_output: Option<String>,
    steps: usize,
    tasks: usize,
}

#[derive(Default)]
struct Progress {
    steps: usize,
    task_steps: usize,
    tasks: usize,
    last_output: Option<String>,
}

impl Progress {
    fn end(self, reason: TerminationReason) -> DriveEnd {
        DriveEnd {
            reason,
            final_output: self.last_output,
            steps: self.steps,
            tasks: self.tasks,
        }
    }
}

pub struct OrchestrationLoop {
    llm: Arc<dyn LlmClient>,
    executor: StepExecutor,
    supervisor: Arc<ProcessSupervisor>,
    compactor: Option<ContextCompactor>,
    prompter: Option<Arc<dyn UserPrompter>>,
    recovery: RecoveryEngine,
    cancel: CancellationToken,
    event_tx: Option<UnboundedSender<ReactEvent>>,
    settings: LoopSettings,
    state: LoopState,
}

impl OrchestrationLoop {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: StepExecutor,
        supervisor: Arc<ProcessSupervisor>,
        cancel: CancellationToken,
        settings: LoopSettings,
    ) -> Self {
        Self {
            llm,
            executor,
            supervisor,
            compactor: None,
            prompter: None,
            recovery: RecoveryEngine::new(),
            cancel,
            event_tx: None,
            settings,
            state: LoopState::AwaitingStep,
        }
    }

    /// 不设置时不做压缩
    pub fn with_compactor(mut self, compactor: ContextCompactor) -> Self {
        self.compactor = Some(compactor);
        self
    }

    /// 连续模式所需；未设置时 output 即结束
    pub fn with_prompter(mut self, prompter: Arc<dyn UserPrompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.executor = self.executor.with_event_tx(tx.clone());
        self.event_tx = Some(tx);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    fn send(&self, ev: ReactEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn set_state(&mut self, state: LoopState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "loop state");
            self.state = state;
            self.send(ReactEvent::State { state });
        }
    }

    /// 运行到结束；无论正常结束、取消还是出错，返回前都已 drain 全部后台服务
    pub async fn run(&mut self, transcript: Transcript) -> Result<LoopOutcome, AgentError> {
        let mut transcript = transcript;
        let result = self.drive(&mut transcript).await;

        let drain = self.supervisor.drain_all().await;
        if !drain.is_empty() {
            info!(%drain, "servers drained");
        }

        let end = result.inspect_err(|e| {
            warn!(error = %e, "orchestration loop failed");
            self.send(ReactEvent::Error {
                text: e.to_string(),
            });
        })?;
        info!(reason = ?end.reason, steps = end.steps, tasks = end.tasks, "orchestration loop finished");
        Ok(LoopOutcome {
            reason: end.reason,
            final_output: end.final_output,
            steps: end.steps,
            tasks: end.tasks,
            drain,
            transcript,
        })
    }

    async fn drive(&mut self, transcript: &mut Transcript) -> Result<DriveEnd, AgentError> {
        let mut progress = Progress {
            tasks: 1,
            ..Progress::default()
        };

        loop {
            if self.cancel.is_cancelled() {
                return Ok(progress.end(TerminationReason::Cancelled));
            }
            if progress.task_steps >= self.settings.max_steps {
                warn!(max_steps = self.settings.max_steps, "step budget exhausted");
                self.send(ReactEvent::Error {
                    text: format!(
                        "Reached the maximum of {} steps for this task",
                        self.settings.max_steps
                    ),
                });
                return Ok(progress.end(TerminationReason::MaxStepsReached));
            }
            self.set_state(LoopState::AwaitingStep);

            if !self.compact(transcript).await {
                return Ok(progress.end(TerminationReason::Cancelled));
            }

            let Some(step) = self.next_step(transcript).await? else {
                return Ok(progress.end(TerminationReason::Cancelled));
            };
            progress.steps += 1;
            progress.task_steps += 1;
            self.send(ReactEvent::StepUpdate {
                step: progress.task_steps,
                max_steps: self.settings.max_steps,
            });
            debug!(step = step.kind_name(), n = progress.task_steps, "step received");

            transcript.push(Message::assistant(step.to_json().to_string()));
            self.set_state(StepExecutor::state_for(&step));

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(progress.end(TerminationReason::Cancelled)),
                outcome = self.executor.execute(&step) => outcome,
            };

            match outcome {
                StepOutcome::Continue => {}
                StepOutcome::Observed(observation) => transcript.push(observation),
                StepOutcome::Concluded { content, follow_up } => {
                    progress.last_output = Some(content.clone());
                    let prompter = match (&self.prompter, self.settings.continuous) {
                        (Some(p), true) => p.clone(),
                        _ => return Ok(progress.end(TerminationReason::Completed)),
                    };
                    let Ok(reply) = prompt_or_cancel(
                        prompter.as_ref(),
                        &self.cancel,
                        &content,
                        follow_up.as_deref(),
                    )
                    .await
                    else {
                        return Ok(progress.end(TerminationReason::Cancelled));
                    };
                    match reply {
                        Some(instruction) if !is_exit_reply(&instruction) => {
                            info!(tasks = progress.tasks + 1, "new instruction, continuing session");
                            transcript.push(Message::user(instruction.trim()));
                            progress.task_steps = 0;
                            progress.tasks += 1;
                        }
                        _ => return Ok(progress.end(TerminationReason::Completed)),
                    }
                }
            }
        }
    }

    /// 按阈值压缩；返回 false 表示压缩过程中被取消
    async fn compact(&self, transcript: &mut Transcript) -> bool {
        let Some(compactor) = &self.compactor else {
            return true;
        };
        if !compactor.needs_compaction(transcript) {
            return true;
        }
        let before = transcript.len();
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            compacted = compactor.compact(transcript.clone()) => {
                *transcript = compacted;
                self.send(ReactEvent::Compacted { before, after: transcript.len() });
                true
            }
        }
    }

    /// 向 LLM 要下一步；协议错误带一次性提示重试，LLM 错误原样重试，超过次数后返回错误。
    /// Ok(None) 表示被取消。解析失败的原始输出不会写入 Transcript。
    async fn next_step(&self, transcript: &Transcript) -> Result<Option<Step>, AgentError> {
        let mut hint: Option<String> = None;
        let mut attempts = 0usize;

        loop {
            attempts += 1;
            self.send(ReactEvent::Thinking);
            let messages = transcript.to_llm_messages(hint.as_deref());
            let call = tokio::time::timeout(self.settings.llm_timeout, self.llm.complete(&messages));
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                result = call => result,
            };

            let err = match result {
                Ok(Ok(raw)) => match parse_step(&raw) {
                    Ok(step) => {
                        let (prompt_tokens, completion_tokens, total_tokens) =
                            self.llm.token_usage();
                        if total_tokens > 0 {
                            self.send(ReactEvent::TokenUsage {
                                prompt_tokens,
                                completion_tokens,
                                total_tokens,
                            });
                        }
                        return Ok(Some(step));
                    }
                    Err(e) => {
                        let preview: String = raw.chars().take(RAW_PREVIEW_CHARS).collect();
                        warn!(error = %e, raw = %preview, attempt = attempts, "unparseable model output");
                        e
                    }
                },
                Ok(Err(e)) => AgentError::Llm(e),
                Err(_) => AgentError::LlmTimeout(self.settings.llm_timeout.as_secs()),
            };

            if attempts > self.settings.max_protocol_retries {
                return Err(match err {
                    AgentError::Protocol(last_error) => {
                        AgentError::ProtocolRetriesExhausted {
                            attempts,
                            last_error,
                        }
                    }
                    other => other,
                });
            }

            match self.recovery.handle(&err) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    self.send(ReactEvent::Recovery {
                        action: "RetryWithPrompt".to_string(),
                        detail: err.to_string(),
                    });
                    hint = Some(prompt);
                }
                RecoveryAction::Retry => {
                    warn!(error = %err, attempt = attempts, "LLM call failed, retrying");
                    self.send(ReactEvent::Recovery {
                        action: "Retry".to_string(),
                        detail: err.to_string(),
                    });
                    hint = None;
                }
                RecoveryAction::Abort => {
                    self.send(ReactEvent::Recovery {
                        action: "Abort".to_string(),
                        detail: err.to_string(),
                    });
                    return Err(err);
                }
            }
        }
    }
}
