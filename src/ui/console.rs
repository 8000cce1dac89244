//! 控制台前端：渲染 ReactEvent，连续模式下从 stdin 读取新指令

use std::io::Write;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::react::{ReactEvent, UserPrompter};

/// 工具输入在控制台上的最大显示长度
const INPUT_PREVIEW_CHARS: usize = 160;

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

/// 单个事件的展示文本；None 表示不显示
pub fn render_event(event: &ReactEvent, show_output: bool) -> Option<String> {
    match event {
        ReactEvent::StepUpdate { step, max_steps } => Some(format!("── step {}/{} ──", step, max_steps)),
        ReactEvent::Plan {
            kind,
            content,
            next_action,
        } => {
            let mut line = format!("🧠 {}: {}", kind.to_uppercase(), content);
            if let Some(next) = next_action {
                line.push_str(&format!("\n   next: {}", next));
            }
            Some(line)
        }
        ReactEvent::ToolCall { tool, input } => Some(format!(
            "🔧 {}({})",
            tool,
            truncate(&input.to_string(), INPUT_PREVIEW_CHARS)
        )),
        ReactEvent::Observation { preview, .. } => Some(format!("👀 {}", preview)),
        ReactEvent::Output { content, follow_up } if show_output => {
            let mut text = format!("🤖 {}", content);
            if let Some(f) = follow_up {
                text.push_str(&format!("\n💡 {}", f));
            }
            Some(text)
        }
        ReactEvent::Compacted { before, after } => Some(format!(
            "📦 context compacted ({} → {} messages)",
            before, after
        )),
        ReactEvent::Recovery { action, detail } => Some(format!("↻ {}: {}", action, detail)),
        ReactEvent::Error { text } => Some(format!("❌ {}", text)),
        ReactEvent::State { .. }
        | ReactEvent::Thinking
        | ReactEvent::TokenUsage { .. }
        | ReactEvent::Output { .. } => None,
    }
}

/// 后台任务：消费事件并打印到 stdout，发送端全部关闭后结束
pub fn spawn_renderer(mut rx: UnboundedReceiver<ReactEvent>, show_output: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let ReactEvent::TokenUsage { total_tokens, .. } = &event {
                tracing::debug!(total_tokens, "token usage");
            }
            if let Some(text) = render_event(&event, show_output) {
                println!("{}", text);
            }
        }
    })
}

/// 从 stdin 逐行读取指令
pub struct StdinPrompter {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinPrompter {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinPrompter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserPrompter for StdinPrompter {
    async fn next_instruction(&self, output: &str, follow_up: Option<&str>) -> Option<String> {
        // 让渲染任务先输出之前的事件
        tokio::task::yield_now().await;
        println!("\n🤖 {}", output);
        if let Some(f) = follow_up {
            println!("💡 {}", f);
        }
        println!("What next? (press Enter or type 'quit' to finish)");
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stdin");
                None
            }
        }
    }
}
