//! Buzz - 本地开发助手
//!
//! 入口：初始化日志、加载配置、安装信号处理，然后在工作目录中运行一个会话。
//!
//! 用法：`buzz [--config PATH] [--once] [TASK...]`；未给出任务时从 stdin 读取一行。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use buzz::agent::Session;
use buzz::core::{create_agent_builder, ShutdownManager};
use buzz::react::prompt_or_cancel;
use buzz::ui::{spawn_renderer, StdinPrompter};

/// 被中断时的退出码（128 + SIGINT）
const EXIT_INTERRUPTED: i32 = 130;

struct CliArgs {
    config: Option<PathBuf>,
    once: bool,
    task: String,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut config = None;
    let mut once = false;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            "--once" => once = true,
            _ => words.push(arg),
        }
    }
    Ok(CliArgs {
        config,
        once,
        task: words.join(" "),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    buzz::observability::init();
    let args = parse_args()?;

    let mut builder = create_agent_builder(args.config).context("Failed to load configuration")?;
    if args.once {
        builder = builder.with_continuous(false);
    }
    let continuous = builder.config().app.continuous;
    let components = builder
        .build_components()
        .context("Failed to build agent")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let prompter = Arc::new(StdinPrompter::new());
    let task = if args.task.trim().is_empty() {
        let prompt = "Hi! What would you like to build or run?";
        match prompt_or_cancel(prompter.as_ref(), &shutdown.token(), prompt, None).await {
            Ok(reply) => reply.unwrap_or_default(),
            Err(_) => {
                println!();
                std::process::exit(EXIT_INTERRUPTED);
            }
        }
    } else {
        args.task
    };
    if task.trim().is_empty() {
        println!("Nothing to do.");
        return Ok(());
    }

    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
    let renderer = spawn_renderer(event_rx, !continuous);

    let mut session = Session::new(components, shutdown.token()).with_event_tx(event_tx);
    if continuous {
        session = session.with_prompter(prompter);
    }
    let result = session.run(&task).await;
    // 会话结束后发送端已释放，等待渲染完剩余事件
    let _ = renderer.await;

    let report = result.context("Session failed")?;
    println!("\n{}", report.exit_summary());
    if report.cancelled() {
        std::process::exit(EXIT_INTERRUPTED);
    }
    Ok(())
}
