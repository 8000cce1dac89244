//! run_command：同步执行一次性命令（非后台服务）
//!
//! 输入为命令字符串，或 {command, working_directory}；工作目录经 Workspace 校验。
//! 禁止 rm -rf /、mkfs、fork bomb 等子串；执行通过 sh -c / cmd /C，带固定超时。
//! 命令在独立进程组中运行：shell 退出后组内残留的后台进程被清理，超时则整组强杀，不留孤儿进程。

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::process::signal;
use crate::tools::filesystem::Workspace;
use crate::tools::{InputShape, Tool, ToolInput};

/// 禁止的命令子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "chmod 777 /",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "shutdown",
    "reboot",
    ":(){ :|:& };:", // fork bomb
];

/// 输出截断上限（字符），避免把巨量日志塞进上下文
const MAX_OUTPUT_CHARS: usize = 8000;

/// 进程组清理后等待管道读完的上限
const PIPE_DRAIN_WAIT: Duration = Duration::from_secs(2);

pub struct RunCommandTool {
    workspace: Workspace,
    timeout_secs: u64,
}

impl RunCommandTool {
    pub fn new(workspace: Workspace, timeout_secs: u64) -> Self {
        Self {
            workspace,
            timeout_secs,
        }
    }

    fn check_forbidden(raw: &str) -> Result<(), String> {
        let raw_lower = raw.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if raw_lower.contains(forbidden) {
                return Err(format!("Error: forbidden pattern in command: {}", forbidden));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a one-off shell command and wait for it (not for servers; use start_server). Input: \"command\" or {\"command\": \"...\", \"working_directory\": \"...\"}"
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Any
    }

    async fn execute(&self, input: ToolInput) -> Result<String, String> {
        let command = input.text_or_field("command").unwrap_or_default().trim();
        if command.is_empty() {
            return Err("Error: command is required".to_string());
        }
        Self::check_forbidden(command)?;

        let dir_arg = input
            .field("working_directory")
            .or_else(|| input.field("cwd"))
            .unwrap_or(".");
        let dir = self.workspace.resolve(dir_arg).map_err(|_| {
            format!("Error: working directory '{}' is outside the workspace", dir_arg)
        })?;
        if !dir.is_dir() {
            return Err(format!("Error: Directory {} does not exist", dir_arg));
        }

        tracing::info!(command = %command, dir = %dir.display(), "run_command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("Error executing command: {}", e))?;
        let pid = child.id().unwrap_or(0);
        let _group = GroupGuard(pid);
        let stdout_reader = read_pipe(child.stdout.take());
        let stderr_reader = read_pipe(child.stderr.take());

        let status = match tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait(),
        )
        .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                let _ = signal::kill(pid, &mut child);
                return Err(format!("Error executing command: {}", e));
            }
            Err(_) => {
                tracing::warn!(command = %command, pid, "run_command timed out, killing process group");
                if let Err(e) = signal::kill(pid, &mut child) {
                    tracing::warn!(pid, error = %e, "failed to kill command");
                }
                let _ = tokio::time::timeout(PIPE_DRAIN_WAIT, child.wait()).await;
                return Err(format!(
                    "Command timed out after {} seconds",
                    self.timeout_secs
                ));
            }
        };
        // shell 已退出；组内残留的后台进程会一直占着管道
        signal::kill_stragglers(pid);
        let stdout = collect_pipe(stdout_reader).await;
        let stderr = collect_pipe(stderr_reader).await;

        let stdout = truncate(&String::from_utf8_lossy(&stdout));
        let stderr = truncate(&String::from_utf8_lossy(&stderr));
        if status.success() {
            Ok(format!("Command executed successfully. Output: {}", stdout))
        } else {
            let code = status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            Err(format!(
                "Command failed (exit {}) with error: {}{}",
                code,
                stderr,
                if stdout.trim().is_empty() {
                    String::new()
                } else {
                    format!("\nOutput: {}", stdout)
                }
            ))
        }
    }
}

/// 调用被取消（future 被丢弃）时同样清理整个进程组；kill_on_drop 只覆盖 shell 本身
struct GroupGuard(u32);

impl Drop for GroupGuard {
    fn drop(&mut self) {
        signal::kill_stragglers(self.0);
    }
}

fn read_pipe<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                tracing::debug!(error = %e, "failed to read command output");
            }
        }
        buf
    })
}

/// 管道迟迟不关闭（有进程脱离了进程组）时放弃读取
async fn collect_pipe(reader: JoinHandle<Vec<u8>>) -> Vec<u8> {
    let abort = reader.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_WAIT, reader).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "command output reader failed");
            Vec::new()
        }
        Err(_) => {
            abort.abort();
            Vec::new()
        }
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > MAX_OUTPUT_CHARS {
        let tail: String = s
            .chars()
            .rev()
            .take(MAX_OUTPUT_CHARS)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("...(truncated)\n{}", tail)
    } else {
        s.to_string()
    }
}
