//! 编排循环端到端测试：ScriptedLlmClient 驱动 Session / OrchestrationLoop

use std::sync::Arc;

use async_trait::async_trait;
use buzz::agent::Session;
use buzz::config::AppConfig;
use buzz::core::{AgentBuilder, AgentComponents, AgentError, LoopState, TerminationReason};
use buzz::llm::{LlmClient, ScriptedLlmClient};
use buzz::memory::{ContextCompactor, Message, Role, Summarizer, Transcript};
use buzz::react::{ReactEvent, ScriptedPrompter};
use buzz::tools::ToolInput;
use tokio_util::sync::CancellationToken;

fn config(continuous: bool) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.app.continuous = continuous;
    cfg.compaction.enabled = false;
    cfg.servers.default_startup_wait_ms = 100;
    cfg.servers.bundler_startup_wait_ms = 100;
    cfg.servers.stop_grace_ms = 1000;
    cfg.servers.kill_wait_ms = 1000;
    cfg
}

fn components(
    dir: &tempfile::TempDir,
    cfg: AppConfig,
    llm: Arc<ScriptedLlmClient>,
) -> AgentComponents {
    let mut cfg = cfg;
    cfg.servers.log_dir = Some(dir.path().join("logs"));
    AgentBuilder::new(cfg, dir.path().join("workspace"))
        .with_llm(llm)
        .with_persona("test persona")
        .build_components()
        .unwrap()
}

fn drain_events(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ReactEvent>) -> Vec<ReactEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

#[tokio::test]
async fn transcript_grows_by_one_per_step_and_two_per_action() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"step": "plan", "content": "look around"}"#,
        r#"{"step": "action", "function": "list_directory", "input": "."}"#,
        r#"{"step": "observe", "content": "empty workspace"}"#,
        r#"{"step": "output", "content": "nothing here yet"}"#,
    ]));
    let session = Session::new(components(&dir, config(false), llm), CancellationToken::new());
    let report = session.run("what is in the workspace?").await.unwrap();

    let t = &report.outcome.transcript;
    // system + user, plan +1, action +2, observe +1, output +1
    assert_eq!(t.len(), 7);
    let roles: Vec<Role> = t.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::Assistant,
        ]
    );
    assert_eq!(report.outcome.reason, TerminationReason::Completed);
    assert_eq!(report.outcome.final_output.as_deref(), Some("nothing here yet"));
    assert_eq!(report.outcome.steps, 4);
}

#[tokio::test]
async fn unknown_tool_becomes_observation_and_loop_continues() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"step": "action", "function": "frobnicate", "input": "x"}"#,
        r#"{"step": "output", "content": "recovered"}"#,
    ]));
    let session = Session::new(components(&dir, config(false), llm), CancellationToken::new());
    let report = session.run("do something").await.unwrap();

    let t = report.outcome.transcript.messages();
    let observation = &t[3];
    assert_eq!(observation.role, Role::Tool);
    let v: serde_json::Value = serde_json::from_str(&observation.content).unwrap();
    assert_eq!(v["step"], "observe");
    assert!(v["content"].as_str().unwrap().contains("not found"));
    assert_eq!(report.outcome.final_output.as_deref(), Some("recovered"));
}

#[tokio::test]
async fn wrong_input_shape_is_a_descriptive_observation() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
    let c = components(&dir, config(false), llm);

    let out = c
        .executor
        .execute("write_file", ToolInput::Text("hello.txt".to_string()))
        .await;
    assert!(out.contains("Invalid input for tool 'write_file'"), "{out}");
    assert!(!dir.path().join("workspace/hello.txt").exists());
}

#[tokio::test]
async fn continuous_mode_appends_new_instruction() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"step": "output", "content": "todo app ready", "follow_up": "Add dark mode?"}"#,
        r#"{"step": "plan", "content": "add a theme toggle"}"#,
        r#"{"step": "output", "content": "dark mode added"}"#,
    ]));
    let prompter = Arc::new(ScriptedPrompter::new(["add dark mode"]));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let session = Session::new(components(&dir, config(true), llm), CancellationToken::new())
        .with_prompter(prompter.clone())
        .with_event_tx(tx);
    let report = session.run("build a todo app").await.unwrap();

    let t = report.outcome.transcript.messages();
    assert_eq!(t.len(), 6);
    assert_eq!(t[1], Message::user("build a todo app"));
    assert_eq!(t[3], Message::user("add dark mode"));
    let plan: serde_json::Value = serde_json::from_str(&t[4].content).unwrap();
    assert_eq!(plan["step"], "plan");
    assert_eq!(report.outcome.tasks, 2);
    assert_eq!(report.outcome.final_output.as_deref(), Some("dark mode added"));

    let prompts = prompter.prompts();
    assert_eq!(prompts[0].0, "todo app ready");
    assert_eq!(prompts[0].1.as_deref(), Some("Add dark mode?"));

    // 新指令之后从 AwaitingStep 重新进入 Planning
    let states: Vec<LoopState> = drain_events(&mut rx)
        .into_iter()
        .filter_map(|ev| match ev {
            ReactEvent::State { state } => Some(state),
            _ => None,
        })
        .collect();
    let concluded = states
        .iter()
        .position(|s| *s == LoopState::Concluded)
        .unwrap();
    assert_eq!(
        &states[concluded + 1..concluded + 3],
        &[LoopState::AwaitingStep, LoopState::Planning]
    );
}

#[tokio::test]
async fn exit_sentinel_ends_continuous_session() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"step": "output", "content": "hello"}"#,
    ]));
    let prompter = Arc::new(ScriptedPrompter::new(["quit"]));
    let session = Session::new(components(&dir, config(true), llm), CancellationToken::new())
        .with_prompter(prompter);
    let report = session.run("hi").await.unwrap();
    assert_eq!(report.outcome.reason, TerminationReason::Completed);
    assert_eq!(report.outcome.tasks, 1);
}

#[tokio::test]
async fn step_budget_resets_per_task() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"step": "plan", "content": "a"}"#,
        r#"{"step": "output", "content": "first"}"#,
        r#"{"step": "plan", "content": "b"}"#,
        r#"{"step": "output", "content": "second"}"#,
    ]));
    let mut cfg = config(true);
    cfg.agent.max_steps = 2;
    let prompter = Arc::new(ScriptedPrompter::new(["again"]));
    let session = Session::new(components(&dir, cfg, llm), CancellationToken::new())
        .with_prompter(prompter);
    let report = session.run("go").await.unwrap();
    assert_eq!(report.outcome.reason, TerminationReason::Completed);
    assert_eq!(report.outcome.steps, 4);
    assert_eq!(report.outcome.final_output.as_deref(), Some("second"));
}

#[tokio::test]
async fn exhausted_protocol_retries_fail_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(["garbage", "more garbage"]));
    let mut cfg = config(false);
    cfg.agent.max_protocol_retries = 1;
    let session = Session::new(components(&dir, cfg, llm), CancellationToken::new());
    let err = session.run("task").await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::ProtocolRetriesExhausted { attempts: 2, .. }
    ));
}

#[tokio::test]
async fn llm_errors_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
    llm.push_error("connection reset");
    llm.push_output(r#"{"step": "output", "content": "ok"}"#);
    let session = Session::new(
        components(&dir, config(false), llm.clone()),
        CancellationToken::new(),
    );
    let report = session.run("task").await.unwrap();
    assert_eq!(report.outcome.final_output.as_deref(), Some("ok"));
    assert_eq!(llm.calls().len(), 2);
}

#[tokio::test]
async fn loop_compacts_before_asking_for_the_next_step() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"step": "plan", "content": "p1"}"#,
        r#"{"step": "plan", "content": "p2"}"#,
        r#"{"step": "plan", "content": "p3"}"#,
        "Planned three things so far.",
        r#"{"step": "output", "content": "done"}"#,
    ]));
    let mut cfg = config(false);
    cfg.compaction.enabled = true;
    cfg.compaction.max_entries = 4;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let session = Session::new(components(&dir, cfg, llm), CancellationToken::new())
        .with_event_tx(tx);
    let report = session.run("task").await.unwrap();

    let t = report.outcome.transcript.messages();
    assert_eq!(t.len(), 4);
    assert_eq!(t[0].role, Role::System);
    assert!(t[1].summary);
    assert!(t[1].content.contains("Planned three things so far."));
    assert!(drain_events(&mut rx)
        .iter()
        .any(|ev| matches!(ev, ReactEvent::Compacted { before: 5, after: 3 })));
}

struct FixedSummarizer;

#[async_trait]
impl Summarizer for FixedSummarizer {
    async fn summarize(&self, history: &[Message]) -> Result<String, AgentError> {
        Ok(format!("{} earlier messages", history.len()))
    }
}

#[tokio::test]
async fn compaction_keeps_system_summary_and_latest() {
    let mut t = Transcript::new("persona", "task");
    for i in 0..18 {
        t.push(Message::assistant(format!("step {}", i)));
    }
    assert_eq!(t.len(), 20);
    let original_system = t.system().clone();
    let latest = t.last().cloned().unwrap();

    let compactor = ContextCompactor::new(Arc::new(FixedSummarizer), 15);
    let compacted = compactor.maybe_compact(t).await;
    assert_eq!(compacted.len(), 3);
    assert_eq!(compacted.messages()[0], original_system);
    assert!(compacted.messages()[1].content.contains("18 earlier messages"));
    assert_eq!(compacted.messages()[2], latest);
}

#[tokio::test]
async fn compaction_leaves_short_transcripts_alone() {
    let mut t = Transcript::new("persona", "task");
    for i in 0..13 {
        t.push(Message::assistant(format!("step {}", i)));
    }
    let compactor = ContextCompactor::new(Arc::new(FixedSummarizer), 15);
    let same = compactor.maybe_compact(t.clone()).await;
    assert_eq!(same, t);
}

#[tokio::test]
async fn cancellation_ends_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"step": "output", "content": "never"}"#,
    ]));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let session = Session::new(components(&dir, config(false), llm), cancel);
    let report = session.run("task").await.unwrap();
    assert!(report.cancelled());
    assert!(report.exit_summary().contains("interrupted"));
}

/// 脚本用完后挂起不返回，模拟迟迟没有响应的 LLM
struct StallingLlm {
    script: ScriptedLlmClient,
    stalled: tokio::sync::Notify,
}

impl StallingLlm {
    fn new(outputs: &[&str]) -> Self {
        Self {
            script: ScriptedLlmClient::new(outputs.iter().copied()),
            stalled: tokio::sync::Notify::new(),
        }
    }
}

#[async_trait]
impl LlmClient for StallingLlm {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if self.script.remaining() > 0 {
            return self.script.complete(messages).await;
        }
        self.stalled.notify_one();
        std::future::pending().await
    }
}

const START_DEV_SERVER: &str =
    r#"{"step": "action", "function": "start_server", "input": {"command": "sleep 30", "name": "dev"}}"#;

#[cfg(unix)]
#[tokio::test]
async fn cancel_during_llm_call_drains_live_server() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(false);
    cfg.servers.log_dir = Some(dir.path().join("logs"));
    let llm = Arc::new(StallingLlm::new(&[START_DEV_SERVER]));
    let components = AgentBuilder::new(cfg, dir.path().join("workspace"))
        .with_llm(llm.clone())
        .with_persona("test persona")
        .build_components()
        .unwrap();
    let supervisor = components.supervisor.clone();
    let project = components.project.clone();

    let cancel = CancellationToken::new();
    let session = Session::new(components, cancel.clone());
    let run = tokio::spawn(async move { session.run("start the dev server").await });

    llm.stalled.notified().await;
    assert_eq!(supervisor.len().await, 1);
    assert!(project.read().await.server_running());
    cancel.cancel();

    let report = tokio::time::timeout(std::time::Duration::from_secs(10), run)
        .await
        .expect("session did not stop after cancellation")
        .unwrap()
        .unwrap();
    assert!(report.cancelled());
    assert_eq!(report.outcome.drain.total(), 1);
    assert!(supervisor.is_empty().await);
    assert!(supervisor.is_closed().await);
    assert!(!report.project.server_running());
    assert!(report.exit_summary().contains("Stopped 1 background server(s)."));
}

#[cfg(unix)]
#[tokio::test]
async fn failed_session_still_drains_live_server() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(false);
    cfg.agent.max_protocol_retries = 1;
    let llm = Arc::new(ScriptedLlmClient::new([
        START_DEV_SERVER,
        "not a step",
        "still not a step",
    ]));
    let components = components(&dir, cfg, llm);
    let supervisor = components.supervisor.clone();

    let session = Session::new(components, CancellationToken::new());
    let err = session.run("start the dev server").await.unwrap_err();
    assert!(matches!(err, AgentError::ProtocolRetriesExhausted { .. }));
    assert!(supervisor.is_empty().await);
    assert!(supervisor.is_closed().await);
}
