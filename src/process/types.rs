//! 后台服务的登记项与各操作的结果类型

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tokio::process::Child;

use crate::core::AgentError;
use crate::process::ports::ServerKind;

/// 服务生命周期状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// 已 spawn，仍在启动等待中
    Starting,
    Running,
    /// 自行退出（被 list / stop 发现）
    Exited,
    /// 被 stop / drain 终止
    Killed,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Exited => "exited",
            ProcessStatus::Killed => "killed",
        };
        f.write_str(s)
    }
}

/// 登记中的后台服务；子进程句柄只由 ProcessSupervisor 访问
pub(crate) struct ManagedProcess {
    pub name: String,
    pub command: String,
    pub kind: ServerKind,
    pub working_directory: PathBuf,
    pub pid: u32,
    pub start_time: DateTime<Local>,
    pub started: Instant,
    pub status: ProcessStatus,
    /// 分配给该服务的端口（推测值，用于避开同类服务的端口）
    pub port: Option<u16>,
    pub url: Option<String>,
    pub log_path: PathBuf,
    pub child: Child,
}

impl ManagedProcess {
    /// 非阻塞检查是否已退出：Some(code) 表示已退出（被信号终止时 code 为 None）
    pub fn poll_exit(&mut self) -> Option<Option<i32>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(server = %self.name, error = %e, "failed to poll server process");
                Some(None)
            }
        }
    }

    pub fn descriptor(&self) -> ServerDescriptor {
        ServerDescriptor {
            name: self.name.clone(),
            pid: self.pid,
            command: self.command.clone(),
            working_directory: self.working_directory.clone(),
            start_time: self.start_time,
            runtime: self.started.elapsed(),
            status: self.status,
            url: self.url.clone(),
            log_path: self.log_path.clone(),
        }
    }
}

/// 对外暴露的服务快照
#[derive(Clone, Debug, Serialize)]
pub struct ServerDescriptor {
    pub name: String,
    pub pid: u32,
    pub command: String,
    pub working_directory: PathBuf,
    pub start_time: DateTime<Local>,
    pub runtime: Duration,
    pub status: ProcessStatus,
    pub url: Option<String>,
    pub log_path: PathBuf,
}

/// 启动成功后的信息
#[derive(Clone, Debug, Serialize)]
pub struct StartedServer {
    pub name: String,
    pub pid: u32,
    /// 推测的访问地址（提示性质）
    pub url: Option<String>,
    /// 启动后端口探测是否连通
    pub url_verified: bool,
}

/// start 的结果；前置检查失败与启动期退出都不是错误，而是给模型看的结果
#[derive(Clone, Debug)]
pub enum StartOutcome {
    Started(StartedServer),
    /// 前置检查未通过，没有 spawn 任何进程
    Rejected(String),
    /// 进程在启动等待期内退出，已从登记表移除
    Exited {
        name: String,
        code: Option<i32>,
        output: String,
    },
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Started(s) => {
                write!(f, "Server '{}' started successfully! PID: {}.", s.name, s.pid)?;
                if let Some(url) = &s.url {
                    write!(f, " Check {}", url)?;
                    if !s.url_verified {
                        write!(f, " (guessed; port not yet reachable)")?;
                    }
                }
                Ok(())
            }
            StartOutcome::Rejected(msg) => f.write_str(msg),
            StartOutcome::Exited { name, code, output } => {
                let code = code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
                write!(
                    f,
                    "Server '{}' failed to start. Process exited with code: {}",
                    name, code
                )?;
                if !output.trim().is_empty() {
                    write!(f, "\nOutput:\n{}", output.trim_end())?;
                }
                Ok(())
            }
        }
    }
}

/// stop 的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    NotFound(String),
    /// 停止前已自行退出，仅做了登记清理
    AlreadyExited { name: String, code: Option<i32> },
    /// forced 表示温和退出超时后使用了强制终止
    Stopped { name: String, forced: bool },
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::NotFound(name) => write!(f, "Server '{}' not found", name),
            StopOutcome::AlreadyExited { name, .. } => {
                write!(f, "Server '{}' had already exited; removed from registry", name)
            }
            StopOutcome::Stopped { name, forced: false } => {
                write!(f, "Server '{}' stopped successfully", name)
            }
            StopOutcome::Stopped { name, forced: true } => {
                write!(f, "Server '{}' did not exit in time and was force killed", name)
            }
        }
    }
}

/// list 的结果：仍在运行的服务，以及本次清理掉的已退出服务
#[derive(Clone, Debug, Default)]
pub struct ListReport {
    pub servers: Vec<ServerDescriptor>,
    pub reaped: Vec<String>,
}

impl fmt::Display for ListReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.servers.is_empty() {
            if self.reaped.is_empty() {
                return f.write_str("No servers currently running");
            }
            return write!(
                f,
                "No active servers (cleaned up {} inactive process(es))",
                self.reaped.len()
            );
        }
        f.write_str("Active servers:")?;
        for s in &self.servers {
            write!(
                f,
                "\n- {}: {} (PID: {}, Runtime: {:.1}s, Dir: {}",
                s.name,
                s.command,
                s.pid,
                s.runtime.as_secs_f64(),
                s.working_directory.display()
            )?;
            if let Some(url) = &s.url {
                write!(f, ", URL: {}", url)?;
            }
            f.write_str(")")?;
        }
        if !self.reaped.is_empty() {
            write!(f, "\n\nCleaned up {} inactive server(s)", self.reaped.len())?;
        }
        Ok(())
    }
}

/// drain_all 的结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub stopped: Vec<String>,
    pub forced: Vec<String>,
    pub already_exited: Vec<String>,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.stopped.len() + self.forced.len() + self.already_exited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for DrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("No servers to stop");
        }
        write!(
            f,
            "Stopped {} server(s): {} graceful, {} force killed, {} already exited",
            self.total(),
            self.stopped.len(),
            self.forced.len(),
            self.already_exited.len()
        )
    }
}

/// 进程层真正的失败（spawn 失败等）；前置检查不通过不属于此类
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<ProcessError> for AgentError {
    fn from(e: ProcessError) -> Self {
        AgentError::Process(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_outcome_display() {
        let started = StartOutcome::Started(StartedServer {
            name: "dev".to_string(),
            pid: 42,
            url: Some("http://localhost:5173".to_string()),
            url_verified: false,
        });
        let text = started.to_string();
        assert!(text.contains("'dev' started successfully"));
        assert!(text.contains("http://localhost:5173"));
        assert!(text.contains("guessed"));

        let exited = StartOutcome::Exited {
            name: "dev".to_string(),
            code: Some(1),
            output: "boom\n".to_string(),
        };
        assert!(exited.to_string().contains("exited with code: 1"));
        assert!(exited.to_string().ends_with("boom"));
    }

    #[test]
    fn test_list_report_empty() {
        assert_eq!(ListReport::default().to_string(), "No servers currently running");
        let report = ListReport {
            servers: vec![],
            reaped: vec!["a".to_string()],
        };
        assert!(report.to_string().contains("cleaned up 1"));
    }
}
