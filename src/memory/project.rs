//! 项目上下文：当前项目路径、类型、服务状态与已知文件
//!
//! 由多个工具共享读取，只能通过下面的专用方法修改。进程是否存活以 ProcessSupervisor 为准，
//! 这里的 server_running 只用于给用户展示状态。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

pub type SharedProjectContext = Arc<RwLock<ProjectContext>>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectContext {
    project_path: Option<String>,
    project_type: Option<String>,
    server_running: bool,
    active_server_name: Option<String>,
    known_files: BTreeSet<String>,
}

/// update 可识别的字段
const UPDATABLE_FIELDS: &[&str] = &[
    "project_path",
    "project_type",
    "server_running",
    "active_server_name",
    "server_name",
];

impl ProjectContext {
    pub fn shared() -> SharedProjectContext {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn project_path(&self) -> Option<&str> {
        self.project_path.as_deref()
    }

    pub fn project_type(&self) -> Option<&str> {
        self.project_type.as_deref()
    }

    pub fn server_running(&self) -> bool {
        self.server_running
    }

    pub fn active_server_name(&self) -> Option<&str> {
        self.active_server_name.as_deref()
    }

    pub fn known_files(&self) -> &BTreeSet<String> {
        &self.known_files
    }

    /// 按字段更新；返回未识别而被忽略的字段名
    ///
    /// 切换到新的 project_path 时清空已知文件列表。
    pub fn update(&mut self, fields: &BTreeMap<String, String>) -> Result<Vec<String>, String> {
        if let Some(running) = fields.get("server_running") {
            self.server_running = match running.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => true,
                "false" | "no" | "0" => false,
                other => return Err(format!("server_running must be true or false, got '{}'", other)),
            };
        }
        if let Some(path) = fields.get("project_path") {
            let path = normalize(path);
            if self.project_path.as_deref() != Some(path.as_str()) {
                self.known_files.clear();
            }
            self.project_path = Some(path);
        }
        if let Some(kind) = fields.get("project_type") {
            self.project_type = Some(kind.clone());
        }
        if let Some(name) = fields
            .get("active_server_name")
            .or_else(|| fields.get("server_name"))
        {
            self.active_server_name = Some(name.clone()).filter(|n| !n.is_empty());
        }

        Ok(fields
            .keys()
            .filter(|k| !UPDATABLE_FIELDS.contains(&k.as_str()))
            .cloned()
            .collect())
    }

    /// 记录写入过的文件（仅限当前项目目录下的路径）
    pub fn record_file(&mut self, path: &str) {
        let path = normalize(path);
        let inside = match &self.project_path {
            Some(root) => root.is_empty() || root == "." || Path::new(&path).starts_with(root),
            None => false,
        };
        if inside {
            self.known_files.insert(path);
        }
    }

    /// 删除文件或目录后移除对应记录
    pub fn forget_file(&mut self, path: &str) {
        let path = normalize(path);
        self.known_files
            .retain(|f| f != &path && !Path::new(f).starts_with(&path));
    }

    pub fn mark_server_started(&mut self, name: &str) {
        self.server_running = true;
        self.active_server_name = Some(name.to_string());
    }

    /// 只有停止的是当前活动服务时才清除状态
    pub fn mark_server_stopped(&mut self, name: &str) {
        if self.active_server_name.as_deref() == Some(name) {
            self.server_running = false;
            self.active_server_name = None;
        }
    }

    pub fn mark_all_servers_stopped(&mut self) {
        self.server_running = false;
        self.active_server_name = None;
    }
}

impl fmt::Display for ProjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim();
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() {
        ".".to_string()
    } else {
        trimmed.to_string()
    }
}
