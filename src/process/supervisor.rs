//! 后台服务监管者
//!
//! 唯一持有子进程句柄的组件：start / stop / list / drain_all 都在同一把互斥锁下修改登记表，
//! 因此取消处理与主循环并发调用也不会互相踩踏。服务的 stdout/stderr 写入独立日志文件而不是管道，
//! 子进程永远不会因为无人读取管道而阻塞。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::ServersSection;
use crate::process::ports::{self, ServerKind};
use crate::process::signal;
use crate::process::types::{
    DrainReport, ListReport, ManagedProcess, ProcessError, ProcessStatus, StartOutcome,
    StartedServer, StopOutcome,
};

/// 启动失败时回传的日志尾部上限（字节）
const LOG_TAIL_BYTES: usize = 4096;

#[derive(Default)]
struct Registry {
    processes: BTreeMap<String, ManagedProcess>,
    /// drain_all 之后不再接受新的 start
    closed: bool,
}

impl Registry {
    /// server_N，N 从当前登记数 + 1 开始，跳过已占用的名字
    fn next_auto_name(&self) -> String {
        let mut n = self.processes.len() + 1;
        loop {
            let name = format!("server_{}", n);
            if !self.processes.contains_key(&name) {
                return name;
            }
            n += 1;
        }
    }
}

pub struct ProcessSupervisor {
    base_dir: PathBuf,
    settings: ServersSection,
    registry: Mutex<Registry>,
}

impl ProcessSupervisor {
    /// base_dir 用于解析相对目录（通常是 workspace 根目录）
    pub fn new(base_dir: impl Into<PathBuf>, settings: ServersSection) -> Self {
        Self {
            base_dir: base_dir.into(),
            settings,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// 启动后台服务
    ///
    /// 目录不存在、缺少标记文件、重名等前置检查失败返回 `StartOutcome::Rejected`，不会 spawn；
    /// 只有 spawn 本身失败才返回 `ProcessError`。
    pub async fn start(
        &self,
        directory: &Path,
        command: &str,
        name: Option<&str>,
    ) -> Result<StartOutcome, ProcessError> {
        let command = command.trim();
        if command.is_empty() {
            return Ok(StartOutcome::Rejected(
                "Error: command must not be empty".to_string(),
            ));
        }

        let dir = self.resolve_dir(directory);
        if !dir.is_dir() {
            return Ok(StartOutcome::Rejected(format!(
                "Error: Directory {} does not exist",
                directory.display()
            )));
        }
        if let Some(marker) = ports::required_marker(command) {
            if !dir.join(marker).is_file() {
                return Ok(StartOutcome::Rejected(format!(
                    "Error: no {} found in {}",
                    marker,
                    directory.display()
                )));
            }
        }
        let working_directory = dir.canonicalize().unwrap_or(dir);
        let kind = ServerKind::classify(command);

        let (name, pid) = {
            let mut registry = self.registry.lock().await;
            if registry.closed {
                return Ok(StartOutcome::Rejected(
                    "Error: shutting down, no new servers can be started".to_string(),
                ));
            }

            let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
                Some(requested) => {
                    if let Some(existing) = registry.processes.get_mut(requested) {
                        if existing.poll_exit().is_none() {
                            return Ok(StartOutcome::Rejected(format!(
                                "Error: a server named '{}' is already running (PID: {})",
                                requested, existing.pid
                            )));
                        }
                        signal::kill_stragglers(existing.pid);
                        registry.processes.remove(requested);
                    }
                    requested.to_string()
                }
                None => registry.next_auto_name(),
            };

            let log_path = self.log_path_for(&name);
            let child = spawn_server(command, &working_directory, &log_path)?;
            let pid = child.id().unwrap_or(0);
            info!(
                server = %name,
                pid,
                command,
                dir = %working_directory.display(),
                log = %log_path.display(),
                "server spawned"
            );

            registry.processes.insert(
                name.clone(),
                ManagedProcess {
                    name: name.clone(),
                    command: command.to_string(),
                    kind,
                    working_directory: working_directory.clone(),
                    pid,
                    start_time: Local::now(),
                    started: Instant::now(),
                    status: ProcessStatus::Starting,
                    port: None,
                    url: None,
                    log_path,
                    child,
                },
            );
            (name, pid)
        };

        tokio::time::sleep(self.startup_wait(kind)).await;

        let mut registry = self.registry.lock().await;
        let exit = match registry.processes.get_mut(&name) {
            Some(process) => process.poll_exit(),
            None => {
                return Ok(StartOutcome::Exited {
                    name,
                    code: None,
                    output: "server was stopped during startup".to_string(),
                })
            }
        };

        if let Some(code) = exit {
            let log_path = match registry.processes.remove(&name) {
                Some(process) => process.log_path,
                None => self.log_path_for(&name),
            };
            drop(registry);
            signal::kill_stragglers(pid);
            warn!(server = %name, pid, ?code, "server exited during startup");
            return Ok(StartOutcome::Exited {
                name,
                code,
                output: read_log_tail(&log_path).await,
            });
        }

        let claimed: Vec<u16> = registry
            .processes
            .values()
            .filter(|p| p.name != name && p.kind == kind && p.status == ProcessStatus::Running)
            .filter_map(|p| p.port)
            .collect();
        let port = ports::guess_port(command, claimed);
        let url = port.map(|p| format!("http://localhost:{}", p));
        if let Some(process) = registry.processes.get_mut(&name) {
            process.status = ProcessStatus::Running;
            process.port = port;
            process.url = url.clone();
        }
        drop(registry);

        let url_verified = match port {
            Some(p) => ports::probe(p, Duration::from_millis(self.settings.port_probe_ms)).await,
            None => false,
        };
        info!(server = %name, pid, url = ?url, url_verified, "server running");

        Ok(StartOutcome::Started(StartedServer {
            name,
            pid,
            url,
            url_verified,
        }))
    }

    /// 停止服务：SIGTERM → 等待 → SIGKILL → 再等待；确认停止后才从登记表移除
    pub async fn stop(&self, name: &str) -> StopOutcome {
        let mut registry = self.registry.lock().await;
        let Some(process) = registry.processes.get_mut(name) else {
            return StopOutcome::NotFound(name.to_string());
        };

        let outcome = match process.poll_exit() {
            Some(code) => {
                process.status = ProcessStatus::Exited;
                signal::kill_stragglers(process.pid);
                info!(server = %name, ?code, "server had already exited");
                StopOutcome::AlreadyExited {
                    name: name.to_string(),
                    code,
                }
            }
            None => {
                let forced = self.terminate(process).await;
                process.status = ProcessStatus::Killed;
                info!(server = %name, forced, "server stopped");
                StopOutcome::Stopped {
                    name: name.to_string(),
                    forced,
                }
            }
        };
        registry.processes.remove(name);
        outcome
    }

    /// 列出服务，顺带清理已退出的登记项
    pub async fn list(&self) -> ListReport {
        let mut registry = self.registry.lock().await;
        let mut reaped = Vec::new();
        for (name, process) in registry.processes.iter_mut() {
            if let Some(code) = process.poll_exit() {
                process.status = ProcessStatus::Exited;
                signal::kill_stragglers(process.pid);
                info!(server = %name, pid = process.pid, ?code, "reaped exited server");
                reaped.push(name.clone());
            }
        }
        for name in &reaped {
            registry.processes.remove(name);
        }

        ListReport {
            servers: registry
                .processes
                .values()
                .map(ManagedProcess::descriptor)
                .collect(),
            reaped,
        }
    }

    /// 停止全部服务并关闭监管者；重复调用是空操作
    ///
    /// 先向所有存活服务发送 SIGTERM，再在同一个宽限期内逐个等待，超时者强制终止。
    pub async fn drain_all(&self) -> DrainReport {
        let mut registry = self.registry.lock().await;
        registry.closed = true;
        let mut report = DrainReport::default();
        if registry.processes.is_empty() {
            return report;
        }
        info!(count = registry.processes.len(), "draining servers");

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.settings.stop_grace_ms);
        let mut live = Vec::new();
        for (name, process) in registry.processes.iter_mut() {
            if process.poll_exit().is_some() {
                process.status = ProcessStatus::Exited;
                signal::kill_stragglers(process.pid);
                report.already_exited.push(name.clone());
                continue;
            }
            if let Err(e) = signal::terminate(process.pid, &mut process.child) {
                warn!(server = %name, error = %e, "failed to send terminate signal");
            }
            live.push(name.clone());
        }

        for name in live {
            let Some(process) = registry.processes.get_mut(&name) else {
                continue;
            };
            match tokio::time::timeout_at(deadline, process.child.wait()).await {
                Ok(Ok(_)) => {
                    signal::kill_stragglers(process.pid);
                    report.stopped.push(name.clone());
                }
                Ok(Err(e)) => {
                    warn!(server = %name, error = %e, "failed to wait for server");
                    self.force_kill(process).await;
                    report.forced.push(name.clone());
                }
                Err(_) => {
                    warn!(server = %name, "server did not exit in time, force killing");
                    self.force_kill(process).await;
                    report.forced.push(name.clone());
                }
            }
            process.status = ProcessStatus::Killed;
        }

        registry.processes.clear();
        info!(%report, "drain complete");
        report
    }

    pub async fn is_closed(&self) -> bool {
        self.registry.lock().await.closed
    }

    pub async fn len(&self) -> usize {
        self.registry.lock().await.processes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 温和终止，超时后强制；返回是否走了强制路径
    async fn terminate(&self, process: &mut ManagedProcess) -> bool {
        if let Err(e) = signal::terminate(process.pid, &mut process.child) {
            warn!(server = %process.name, error = %e, "failed to send terminate signal");
        }
        let grace = Duration::from_millis(self.settings.stop_grace_ms);
        match timeout(grace, process.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(server = %process.name, %status, "server exited after terminate");
                signal::kill_stragglers(process.pid);
                return false;
            }
            Ok(Err(e)) => warn!(server = %process.name, error = %e, "failed to wait for server"),
            Err(_) => warn!(
                server = %process.name,
                grace_ms = self.settings.stop_grace_ms,
                "server did not exit in time, force killing"
            ),
        }
        self.force_kill(process).await;
        true
    }

    async fn force_kill(&self, process: &mut ManagedProcess) {
        if let Err(e) = signal::kill(process.pid, &mut process.child) {
            warn!(server = %process.name, error = %e, "failed to send kill signal");
        }
        let wait = Duration::from_millis(self.settings.kill_wait_ms);
        if timeout(wait, process.child.wait()).await.is_err() {
            error!(server = %process.name, pid = process.pid, "server not reaped after kill");
        }
    }

    fn startup_wait(&self, kind: ServerKind) -> Duration {
        let ms = if kind.is_bundler() {
            self.settings.bundler_startup_wait_ms
        } else {
            self.settings.default_startup_wait_ms
        };
        Duration::from_millis(ms)
    }

    fn resolve_dir(&self, directory: &Path) -> PathBuf {
        if directory.is_absolute() {
            directory.to_path_buf()
        } else {
            self.base_dir.join(directory)
        }
    }

    fn log_path_for(&self, name: &str) -> PathBuf {
        let file: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.settings.resolved_log_dir().join(format!("{}.log", file))
    }
}

impl Drop for ProcessSupervisor {
    /// 兜底：未经 drain 就被丢弃时（如 panic 展开）直接强杀残留进程组
    fn drop(&mut self) {
        let registry = self.registry.get_mut();
        for process in registry.processes.values_mut() {
            if process.poll_exit().is_none() {
                warn!(server = %process.name, pid = process.pid, "supervisor dropped with live server, killing");
                if let Err(e) = signal::kill(process.pid, &mut process.child) {
                    warn!(server = %process.name, error = %e, "failed to kill server");
                }
            } else {
                signal::kill_stragglers(process.pid);
            }
        }
    }
}

fn spawn_server(command: &str, dir: &Path, log_path: &Path) -> Result<Child, ProcessError> {
    let log_error = |source| ProcessError::LogFile {
        path: log_path.to_path_buf(),
        source,
    };
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).map_err(log_error)?;
    }
    let stdout = std::fs::File::create(log_path).map_err(log_error)?;
    let stderr = stdout.try_clone().map_err(log_error)?;

    let mut cmd = shell_command(command);
    cmd.current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn().map_err(|source| ProcessError::Spawn {
        command: command.to_string(),
        source,
    })
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

async fn read_log_tail(path: &Path) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let start = bytes.len().saturating_sub(LOG_TAIL_BYTES);
            String::from_utf8_lossy(&bytes[start..]).into_owned()
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no server log to read");
            String::new()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn settings(log_dir: &Path) -> ServersSection {
        ServersSection {
            bundler_startup_wait_ms: 100,
            default_startup_wait_ms: 100,
            stop_grace_ms: 1000,
            kill_wait_ms: 1000,
            port_probe_ms: 50,
            log_dir: Some(log_dir.to_path_buf()),
        }
    }

    fn supervisor(dir: &tempfile::TempDir) -> ProcessSupervisor {
        ProcessSupervisor::new(dir.path(), settings(&dir.path().join("logs")))
    }

    #[tokio::test]
    async fn test_missing_manifest_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        let sup = supervisor(&dir);
        let out = sup
            .start(Path::new("./app"), "npm run dev", Some("dev"))
            .await
            .unwrap();
        assert!(matches!(out, StartOutcome::Rejected(_)));
        assert!(out.to_string().contains("no package.json"));
        assert!(sup.list().await.servers.is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        let out = sup.start(Path::new("nope"), "sleep 5", None).await.unwrap();
        assert!(out.to_string().contains("does not exist"));
        assert!(sup.is_empty().await);
    }

    #[tokio::test]
    async fn test_start_list_stop() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        let out = sup.start(Path::new("."), "sleep 30", Some("dev")).await.unwrap();
        assert!(out.is_started(), "{out}");

        let listed = sup.list().await;
        assert_eq!(listed.servers.len(), 1);
        assert_eq!(listed.servers[0].name, "dev");
        assert_eq!(listed.servers[0].status, ProcessStatus::Running);

        let stopped = sup.stop("dev").await;
        assert_eq!(
            stopped,
            StopOutcome::Stopped {
                name: "dev".to_string(),
                forced: false
            }
        );
        assert!(sup.list().await.servers.is_empty());
        assert_eq!(sup.stop("dev").await, StopOutcome::NotFound("dev".to_string()));
    }

    #[tokio::test]
    async fn test_exit_during_startup_reports_output() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        let out = sup
            .start(Path::new("."), "echo boom; exit 3", Some("bad"))
            .await
            .unwrap();
        match out {
            StartOutcome::Exited { name, code, output } => {
                assert_eq!(name, "bad");
                assert_eq!(code, Some(3));
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected outcome: {other}"),
        }
        assert!(sup.is_empty().await);
    }

    #[tokio::test]
    async fn test_stubborn_server_is_force_killed() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(&dir.path().join("logs"));
        s.stop_grace_ms = 200;
        let sup = ProcessSupervisor::new(dir.path(), s);
        let out = sup
            .start(Path::new("."), "trap '' TERM; sleep 30", Some("stubborn"))
            .await
            .unwrap();
        assert!(out.is_started(), "{out}");
        let stopped = sup.stop("stubborn").await;
        assert_eq!(
            stopped,
            StopOutcome::Stopped {
                name: "stubborn".to_string(),
                forced: true
            }
        );
        assert!(sup.is_empty().await);
    }

    #[tokio::test]
    async fn test_stop_already_exited() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        let out = sup.start(Path::new("."), "sleep 0.5", Some("short")).await.unwrap();
        assert!(out.is_started(), "{out}");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(matches!(
            sup.stop("short").await,
            StopOutcome::AlreadyExited { code: Some(0), .. }
        ));
        assert!(sup.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_reaps_exited() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        sup.start(Path::new("."), "sleep 0.5", Some("short")).await.unwrap();
        sup.start(Path::new("."), "sleep 30", Some("long")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let listed = sup.list().await;
        assert_eq!(listed.reaped, vec!["short".to_string()]);
        assert_eq!(listed.servers.len(), 1);
        assert!(listed.to_string().contains("Cleaned up 1"));
        sup.drain_all().await;
    }

    #[tokio::test]
    async fn test_auto_names_and_duplicate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        let first = sup.start(Path::new("."), "sleep 30", None).await.unwrap();
        let second = sup.start(Path::new("."), "sleep 30", None).await.unwrap();
        match (&first, &second) {
            (StartOutcome::Started(a), StartOutcome::Started(b)) => {
                assert_eq!(a.name, "server_1");
                assert_eq!(b.name, "server_2");
            }
            _ => panic!("unexpected: {first} / {second}"),
        }
        let dup = sup.start(Path::new("."), "sleep 30", Some("server_1")).await.unwrap();
        assert!(dup.to_string().contains("already running"));
        assert_eq!(sup.len().await, 2);
        sup.drain_all().await;
    }

    #[tokio::test]
    async fn test_dev_servers_get_distinct_ports() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        let mut urls = Vec::new();
        for name in ["a", "b", "c"] {
            match sup
                .start(Path::new("."), "sleep 30 # npm run dev", Some(name))
                .await
                .unwrap()
            {
                StartOutcome::Started(started) => urls.push(started.url),
                other => panic!("unexpected outcome: {other}"),
            }
        }
        assert_eq!(
            urls,
            vec![
                Some("http://localhost:5173".to_string()),
                Some("http://localhost:5174".to_string()),
                Some("http://localhost:5175".to_string()),
            ]
        );

        // 释放的端口可以被下一个服务复用
        sup.stop("a").await;
        match sup
            .start(Path::new("."), "sleep 30 # npm run dev", Some("d"))
            .await
            .unwrap()
        {
            StartOutcome::Started(started) => {
                assert_eq!(started.url.as_deref(), Some("http://localhost:5173"))
            }
            other => panic!("unexpected outcome: {other}"),
        }
        sup.drain_all().await;
    }

    #[tokio::test]
    async fn test_drain_all_stops_everything_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        sup.start(Path::new("."), "sleep 30", Some("a")).await.unwrap();
        sup.start(Path::new("."), "sleep 30", Some("b")).await.unwrap();
        sup.start(Path::new("."), "sleep 0.3", Some("c")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;

        let report = sup.drain_all().await;
        assert_eq!(report.total(), 3);
        assert_eq!(report.already_exited, vec!["c".to_string()]);
        assert!(sup.list().await.servers.is_empty());

        assert!(sup.drain_all().await.is_empty());
        let late = sup.start(Path::new("."), "sleep 30", None).await.unwrap();
        assert!(matches!(late, StartOutcome::Rejected(_)));
        assert!(sup.is_closed().await);
    }
}
