//! 沙箱文件系统工具
//!
//! Workspace 绑定根目录，所有路径经 resolve 做词法规整后必须仍在根下（禁止 ../ 逃逸）；
//! create_directory / read_file / write_file / append_file / delete_file / list_directory 基于 Workspace 实现。
//! 写入与删除会同步更新 ProjectContext 的已知文件列表。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::core::AgentError;
use crate::memory::SharedProjectContext;
use crate::tools::{InputShape, Tool, ToolInput};

/// 沙箱根目录：resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct Workspace {
    root_dir: PathBuf,
}

impl Workspace {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析为根目录下的绝对路径；不要求路径已存在（写文件、建目录时尚不存在）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let raw = path.trim();
        let candidate = Path::new(raw);
        let relative = if candidate.is_absolute() {
            candidate
                .strip_prefix(&self.root_dir)
                .map_err(|_| AgentError::PathEscape(raw.to_string()))?
        } else {
            candidate
        };

        let mut resolved = self.root_dir.clone();
        let mut depth = 0usize;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(AgentError::PathEscape(raw.to_string())); // 如 ../../etc/passwd
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(AgentError::PathEscape(raw.to_string()))
                }
            }
        }
        Ok(resolved)
    }

    pub fn is_root(&self, resolved: &Path) -> bool {
        resolved == self.root_dir
    }
}

fn path_error(path: &str, e: AgentError) -> String {
    match e {
        AgentError::PathEscape(_) => format!("Error: path '{}' is outside the workspace", path),
        other => format!("Error: {}", other),
    }
}

/// create_directory(path)：递归创建目录
pub struct CreateDirectoryTool {
    workspace: Workspace,
}

impl CreateDirectoryTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for CreateDirectoryTool {
    fn name(&self) -> &str {
        "create_directory"
    }

    fn description(&self) -> &str {
        "Create a directory, including missing parents. Input: \"path/to/dir\""
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Text
    }

    async fn execute(&self, input: ToolInput) -> Result<String, String> {
        let path = input.text_or_field("path").unwrap_or_default();
        let resolved = self.workspace.resolve(path).map_err(|e| path_error(path, e))?;
        tracing::info!(path = %resolved.display(), "create_directory");
        tokio::fs::create_dir_all(&resolved)
            .await
            .map(|_| format!("Successfully created directory: {}", path))
            .map_err(|e| format!("Error creating directory {}: {}", path, e))
    }
}

/// read_file(path)
pub struct ReadFileTool {
    workspace: Workspace,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Input: \"path/to/file\""
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Text
    }

    async fn execute(&self, input: ToolInput) -> Result<String, String> {
        let path = input.text_or_field("path").unwrap_or_default();
        let resolved = self.workspace.resolve(path).map_err(|e| path_error(path, e))?;
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => Ok(format!("File content:\n{}", content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(format!("Error: File {} not found", path))
            }
            Err(e) => Err(format!("Error reading file {}: {}", path, e)),
        }
    }
}

/// 写入方式：覆盖或追加
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteMode {
    Overwrite,
    Append,
}

async fn write_with_mode(
    workspace: &Workspace,
    project: &SharedProjectContext,
    input: &ToolInput,
    mode: WriteMode,
) -> Result<String, String> {
    let path = match input.field("path").map(str::trim) {
        Some(p) if !p.is_empty() => p,
        _ => return Err("Error: file path is required".to_string()),
    };
    let content = input.field("content").unwrap_or_default();
    let resolved = workspace.resolve(path).map_err(|e| path_error(path, e))?;
    if workspace.is_root(&resolved) {
        return Err(format!("Error: {} is a directory", path));
    }

    let written: std::io::Result<()> = async {
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match mode {
            WriteMode::Overwrite => tokio::fs::write(&resolved, content).await,
            WriteMode::Append => {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&resolved)
                    .await?;
                file.write_all(content.as_bytes()).await?;
                file.flush().await
            }
        }
    }
    .await;

    match written {
        Ok(()) => {
            project.write().await.record_file(path);
            tracing::info!(path = %resolved.display(), bytes = content.len(), ?mode, "file written");
            Ok(match mode {
                WriteMode::Overwrite => format!("Successfully wrote content to {}", path),
                WriteMode::Append => format!("Successfully appended content to {}", path),
            })
        }
        Err(e) => Err(format!("Error writing to file: {}", e)),
    }
}

/// write_file({path, content})：覆盖写入，自动创建父目录
pub struct WriteFileTool {
    workspace: Workspace,
    project: SharedProjectContext,
}

impl WriteFileTool {
    pub fn new(workspace: Workspace, project: SharedProjectContext) -> Self {
        Self { workspace, project }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write (overwrite) a file, creating parent directories. Input: {\"path\": \"...\", \"content\": \"...\"}"
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Map
    }

    async fn execute(&self, input: ToolInput) -> Result<String, String> {
        write_with_mode(&self.workspace, &self.project, &input, WriteMode::Overwrite).await
    }
}

/// append_file({path, content})
pub struct AppendFileTool {
    workspace: Workspace,
    project: SharedProjectContext,
}

impl AppendFileTool {
    pub fn new(workspace: Workspace, project: SharedProjectContext) -> Self {
        Self { workspace, project }
    }
}

#[async_trait]
impl Tool for AppendFileTool {
    fn name(&self) -> &str {
        "append_file"
    }

    fn description(&self) -> &str {
        "Append to a file, creating it if missing. Input: {\"path\": \"...\", \"content\": \"...\"}"
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Map
    }

    async fn execute(&self, input: ToolInput) -> Result<String, String> {
        write_with_mode(&self.workspace, &self.project, &input, WriteMode::Append).await
    }
}

/// delete_file(path)：删除文件或整个目录
pub struct DeleteFileTool {
    workspace: Workspace,
    project: SharedProjectContext,
}

impl DeleteFileTool {
    pub fn new(workspace: Workspace, project: SharedProjectContext) -> Self {
        Self { workspace, project }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file or a directory tree. Input: \"path\""
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Text
    }

    async fn execute(&self, input: ToolInput) -> Result<String, String> {
        let path = input.text_or_field("path").unwrap_or_default();
        let resolved = self.workspace.resolve(path).map_err(|e| path_error(path, e))?;
        if self.workspace.is_root(&resolved) {
            return Err("Error: refusing to delete the workspace root".to_string());
        }

        let meta = match tokio::fs::symlink_metadata(&resolved).await {
            Ok(m) => m,
            Err(_) => return Err(format!("Error: {} does not exist", path)),
        };
        let (removed, message) = if meta.is_dir() {
            (
                tokio::fs::remove_dir_all(&resolved).await,
                format!("Successfully deleted directory: {}", path),
            )
        } else {
            (
                tokio::fs::remove_file(&resolved).await,
                format!("Successfully deleted file: {}", path),
            )
        };
        removed.map_err(|e| format!("Error deleting {}: {}", path, e))?;
        self.project.write().await.forget_file(path);
        tracing::info!(path = %resolved.display(), "deleted");
        Ok(message)
    }
}

/// list_directory(path)：列出目录，目录名带 / 后缀
pub struct ListDirectoryTool {
    workspace: Workspace,
}

impl ListDirectoryTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List a directory. Input: \"path\" (\".\" for the workspace root)"
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Text
    }

    async fn execute(&self, input: ToolInput) -> Result<String, String> {
        let path = input.text_or_field("path").unwrap_or_default();
        let resolved = self.workspace.resolve(path).map_err(|e| path_error(path, e))?;
        let mut dir = tokio::fs::read_dir(&resolved)
            .await
            .map_err(|e| format!("Error listing {}: {}", path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| format!("Error listing {}: {}", path, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{}/", name) } else { name });
        }
        entries.sort();
        if entries.is_empty() {
            return Ok(format!("{} is empty", if path.is_empty() { "." } else { path }));
        }
        Ok(entries.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ProjectContext;
    use std::collections::BTreeMap;

    fn map(pairs: &[(&str, &str)]) -> ToolInput {
        ToolInput::Map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        assert!(ws.resolve("a/b/../c.txt").is_ok());
        assert!(matches!(ws.resolve("../etc/passwd"), Err(AgentError::PathEscape(_))));
        assert!(matches!(ws.resolve("a/../../x"), Err(AgentError::PathEscape(_))));
        assert!(matches!(ws.resolve("/etc/passwd"), Err(AgentError::PathEscape(_))));
        let inside = ws.root().join("x.txt");
        assert_eq!(ws.resolve(inside.to_str().unwrap()).unwrap(), inside);
    }

    #[tokio::test]
    async fn test_write_read_append_delete() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let project = ProjectContext::shared();
        project
            .write()
            .await
            .update(&BTreeMap::from([("project_path".to_string(), "app".to_string())]))
            .unwrap();

        let write = WriteFileTool::new(ws.clone(), project.clone());
        let out = write
            .execute(map(&[("path", "app/src/main.txt"), ("content", "hello")]))
            .await
            .unwrap();
        assert!(out.contains("Successfully wrote"));
        assert!(project.read().await.known_files().contains("app/src/main.txt"));

        let append = AppendFileTool::new(ws.clone(), project.clone());
        append
            .execute(map(&[("path", "app/src/main.txt"), ("content", " world")]))
            .await
            .unwrap();

        let read = ReadFileTool::new(ws.clone());
        let content = read.execute("app/src/main.txt".into()).await.unwrap();
        assert_eq!(content, "File content:\nhello world");

        let list = ListDirectoryTool::new(ws.clone());
        assert_eq!(list.execute("app".into()).await.unwrap(), "src/");

        let delete = DeleteFileTool::new(ws.clone(), project.clone());
        let out = delete.execute("app/src".into()).await.unwrap();
        assert!(out.contains("deleted directory"));
        assert!(project.read().await.known_files().is_empty());
        let out = delete.execute("app/src".into()).await.unwrap_err();
        assert!(out.contains("does not exist"));
    }

    #[tokio::test]
    async fn test_write_requires_path() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(Workspace::new(dir.path()), ProjectContext::shared());
        let out = tool.execute(map(&[("content", "x")])).await.unwrap_err();
        assert_eq!(out, "Error: file path is required");
    }

    #[tokio::test]
    async fn test_read_missing_and_escape() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::new(Workspace::new(dir.path()));
        assert!(tool.execute("nope.txt".into()).await.unwrap_err().contains("not found"));
        assert!(tool
            .execute("../secret".into())
            .await
            .unwrap_err()
            .contains("outside the workspace"));
    }

    #[tokio::test]
    async fn test_delete_root_refused() {
        let dir = tempfile::tempdir().unwrap();
        let tool = DeleteFileTool::new(Workspace::new(dir.path()), ProjectContext::shared());
        assert!(tool.execute(".".into()).await.unwrap_err().contains("workspace root"));
        assert!(dir.path().exists());
    }
}
