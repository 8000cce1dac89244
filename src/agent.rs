//! 会话运行时
//!
//! Session 把 AgentComponents 组装成 OrchestrationLoop：初始任务写入 Transcript，
//! 循环结束（含取消与出错）后所有后台服务已被 drain，项目上下文同步为无服务运行。

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentComponents, AgentError, TerminationReason};
use crate::memory::{ProjectContext, SharedProjectContext, Transcript};
use crate::react::{LoopOutcome, OrchestrationLoop, ReactEvent, StepExecutor, UserPrompter};
use crate::tools::Workspace;

/// 把命令行输入转为初始任务；输入是已存在的项目路径时改写为启动该项目
pub fn initial_task(input: &str, workspace: &Workspace) -> String {
    let input = input.trim();
    let looks_like_path = input.starts_with("./") || input.starts_with('/');
    let existing = !input.is_empty()
        && !input.contains(char::is_whitespace)
        && workspace.root().join(input).is_dir();
    if looks_like_path || existing {
        let path = workspace
            .resolve(input)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| input.to_string());
        format!(
            "Start the development server for the existing project at {}",
            path
        )
    } else {
        input.to_string()
    }
}

pub struct Session {
    components: AgentComponents,
    prompter: Option<Arc<dyn UserPrompter>>,
    event_tx: Option<UnboundedSender<ReactEvent>>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(components: AgentComponents, cancel: CancellationToken) -> Self {
        Self {
            components,
            prompter: None,
            event_tx: None,
            cancel,
        }
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn UserPrompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn project(&self) -> SharedProjectContext {
        self.components.project.clone()
    }

    pub fn workspace_root(&self) -> &Path {
        self.components.workspace.root()
    }

    /// 运行到会话结束
    pub async fn run(self, input: &str) -> Result<SessionReport, AgentError> {
        let AgentComponents {
            llm,
            executor,
            supervisor,
            project,
            compactor,
            system_prompt,
            settings,
            workspace,
            ..
        } = self.components;

        let task = initial_task(input, &workspace);
        tracing::info!(task = %task, "session started");

        let mut lp = OrchestrationLoop::new(
            llm,
            StepExecutor::new(executor),
            supervisor,
            self.cancel,
            settings,
        );
        if let Some(compactor) = compactor {
            lp = lp.with_compactor(compactor);
        }
        if let Some(prompter) = self.prompter {
            lp = lp.with_prompter(prompter);
        }
        if let Some(tx) = self.event_tx {
            lp = lp.with_event_tx(tx);
        }

        let result = lp.run(Transcript::new(system_prompt, task)).await;
        // 无论结果如何，服务都已停止
        let snapshot = {
            let mut ctx = project.write().await;
            ctx.mark_all_servers_stopped();
            ctx.clone()
        };
        let outcome = result?;
        Ok(SessionReport {
            outcome,
            project: snapshot,
        })
    }
}

#[derive(Debug)]
pub struct SessionReport {
    pub outcome: LoopOutcome,
    pub project: ProjectContext,
}

impl SessionReport {
    pub fn cancelled(&self) -> bool {
        self.outcome.reason == TerminationReason::Cancelled
    }

    /// 退出时的摘要
    pub fn exit_summary(&self) -> String {
        let reason = match self.outcome.reason {
            TerminationReason::Completed => "completed",
            TerminationReason::MaxStepsReached => "stopped at the step limit",
            TerminationReason::Cancelled => "interrupted",
        };
        let mut lines = vec![format!(
            "Session {} after {} step(s) across {} task(s).",
            reason, self.outcome.steps, self.outcome.tasks
        )];
        let drained = self.outcome.drain.total();
        if drained > 0 {
            lines.push(format!("Stopped {} background server(s).", drained));
        }
        if let Some(path) = self.project.project_path() {
            lines.push(format!("Project: {}", path));
        }
        lines.join("\n")
    }
}
