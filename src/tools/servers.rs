//! 后台服务工具：start_server / stop_server / list_servers
//!
//! 只做输入解析与结果渲染，进程句柄全部由 ProcessSupervisor 持有；
//! 启停成功后同步 ProjectContext 中的服务状态（仅供展示）。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::memory::SharedProjectContext;
use crate::process::{ProcessSupervisor, StartOutcome, StopOutcome};
use crate::tools::filesystem::Workspace;
use crate::tools::{InputShape, Tool, ToolInput};

/// start_server({directory, command, name?})
pub struct StartServerTool {
    supervisor: Arc<ProcessSupervisor>,
    workspace: Workspace,
    project: SharedProjectContext,
}

impl StartServerTool {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        workspace: Workspace,
        project: SharedProjectContext,
    ) -> Self {
        Self {
            supervisor,
            workspace,
            project,
        }
    }
}

#[async_trait]
impl Tool for StartServerTool {
    fn name(&self) -> &str {
        "start_server"
    }

    fn description(&self) -> &str {
        "Start a long-running server in the background (e.g. npm run dev). Input: {\"directory\": \"...\", \"command\": \"...\", \"name\": \"optional\"}"
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Map
    }

    async fn execute(&self, input: ToolInput) -> Result<String, String> {
        let directory = input.field("directory").unwrap_or(".");
        let Some(command) = input.field("command").filter(|c| !c.trim().is_empty()) else {
            return Err("Error: command is required".to_string());
        };
        let name = input.field("name");

        if self.workspace.resolve(directory).is_err() {
            return Err(format!(
                "Error: directory '{}' is outside the workspace",
                directory
            ));
        }

        match self
            .supervisor
            .start(Path::new(directory), command, name)
            .await
        {
            Ok(outcome @ StartOutcome::Started(_)) => {
                if let StartOutcome::Started(started) = &outcome {
                    self.project.write().await.mark_server_started(&started.name);
                }
                Ok(outcome.to_string())
            }
            Ok(outcome) => Err(outcome.to_string()),
            Err(e) => Err(format!("Error: {}", e)),
        }
    }
}

/// stop_server(name)
pub struct StopServerTool {
    supervisor: Arc<ProcessSupervisor>,
    project: SharedProjectContext,
}

impl StopServerTool {
    pub fn new(supervisor: Arc<ProcessSupervisor>, project: SharedProjectContext) -> Self {
        Self {
            supervisor,
            project,
        }
    }
}

#[async_trait]
impl Tool for StopServerTool {
    fn name(&self) -> &str {
        "stop_server"
    }

    fn description(&self) -> &str {
        "Stop a background server by name. Input: \"name\""
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Text
    }

    async fn execute(&self, input: ToolInput) -> Result<String, String> {
        let name = input.text_or_field("name").unwrap_or_default().trim();
        let outcome = self.supervisor.stop(name).await;
        match &outcome {
            StopOutcome::NotFound(_) => Err(outcome.to_string()),
            StopOutcome::AlreadyExited { name, .. } | StopOutcome::Stopped { name, .. } => {
                self.project.write().await.mark_server_stopped(name);
                Ok(outcome.to_string())
            }
        }
    }
}

/// list_servers()：输入被忽略
pub struct ListServersTool {
    supervisor: Arc<ProcessSupervisor>,
}

impl ListServersTool {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Tool for ListServersTool {
    fn name(&self) -> &str {
        "list_servers"
    }

    fn description(&self) -> &str {
        "List background servers and clean up ones that have exited. Input: \"\""
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Any
    }

    async fn execute(&self, _input: ToolInput) -> Result<String, String> {
        Ok(self.supervisor.list().await.to_string())
    }
}
