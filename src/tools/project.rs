//! 项目相关工具：detect_project_type / check_project_setup / update_project_context

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::memory::SharedProjectContext;
use crate::tools::filesystem::Workspace;
use crate::tools::{InputShape, Tool, ToolInput};

const RUST_PROJECT: &str = "Rust project (Cargo)";
const PYTHON_PROJECT: &str = "Python project";

/// 由 package.json 的依赖判断 React 项目类型
fn classify_package_json(raw: &str) -> Result<&'static str, String> {
    let package: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let dependencies = package.get("dependencies").and_then(Value::as_object);
    let dev_dependencies = package.get("devDependencies").and_then(Value::as_object);
    let has = |name: &str| {
        dependencies.is_some_and(|d| d.contains_key(name))
            || dev_dependencies.is_some_and(|d| d.contains_key(name))
    };

    Ok(if has("vite") {
        "Vite React Project"
    } else if has("react-scripts") {
        "Create React App"
    } else if dependencies.is_some_and(|d| d.contains_key("react")) {
        "Custom React Project"
    } else {
        "Not a React project"
    })
}

/// Ok(None) 表示目录里没有可识别的清单文件
async fn detect(dir: &Path) -> Result<Option<&'static str>, String> {
    let package_json = dir.join("package.json");
    if package_json.is_file() {
        let raw = tokio::fs::read_to_string(&package_json)
            .await
            .map_err(|e| e.to_string())?;
        return classify_package_json(&raw).map(Some);
    }
    if dir.join("Cargo.toml").is_file() {
        return Ok(Some(RUST_PROJECT));
    }
    if dir.join("pyproject.toml").is_file() || dir.join("requirements.txt").is_file() {
        return Ok(Some(PYTHON_PROJECT));
    }
    Ok(None)
}

pub struct DetectProjectTypeTool {
    workspace: Workspace,
}

impl DetectProjectTypeTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for DetectProjectTypeTool {
    fn name(&self) -> &str {
        "detect_project_type"
    }

    fn description(&self) -> &str {
        "Detect the project type of a directory (Vite React, Create React App, Rust, Python...). Input: \"directory\""
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Text
    }

    async fn execute(&self, input: ToolInput) -> Result<String, String> {
        let directory = input.text_or_field("directory").unwrap_or_default();
        let dir = self
            .workspace
            .resolve(directory)
            .map_err(|_| format!("Error: path '{}' is outside the workspace", directory))?;
        if !dir.is_dir() {
            return Err(format!("Error: Directory {} does not exist", directory));
        }
        match detect(&dir).await {
            Ok(Some(kind)) => Ok(kind.to_string()),
            Ok(None) => Ok("No package.json found".to_string()),
            Err(e) => Err(format!("Error detecting project type: {}", e)),
        }
    }
}

pub struct CheckProjectSetupTool {
    workspace: Workspace,
}

impl CheckProjectSetupTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for CheckProjectSetupTool {
    fn name(&self) -> &str {
        "check_project_setup"
    }

    fn description(&self) -> &str {
        "Check whether a project directory is ready to run (manifest present, dependencies installed). Input: \"directory\""
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Text
    }

    async fn execute(&self, input: ToolInput) -> Result<String, String> {
        let directory = input.text_or_field("directory").unwrap_or_default();
        let dir = self
            .workspace
            .resolve(directory)
            .map_err(|_| format!("Error: path '{}' is outside the workspace", directory))?;
        if !dir.is_dir() {
            return Ok(format!("Directory {} does not exist", directory));
        }

        if dir.join("package.json").is_file() && !dir.join("node_modules").is_dir() {
            return Ok("Dependencies not installed - need to run 'npm install'".to_string());
        }
        match detect(&dir).await {
            Ok(Some(kind)) => Ok(format!("Project ready: {}", kind)),
            Ok(None) => Ok("No package.json found - not a Node.js project".to_string()),
            Err(e) => Err(format!("Error checking project: {}", e)),
        }
    }
}

pub struct UpdateProjectContextTool {
    project: SharedProjectContext,
}

impl UpdateProjectContextTool {
    pub fn new(project: SharedProjectContext) -> Self {
        Self { project }
    }
}

#[async_trait]
impl Tool for UpdateProjectContextTool {
    fn name(&self) -> &str {
        "update_project_context"
    }

    fn description(&self) -> &str {
        "Record the current project. Input: {\"project_path\": \"...\", \"project_type\": \"...\", \"server_running\": \"true|false\", \"active_server_name\": \"...\"} (all optional)"
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Map
    }

    async fn execute(&self, input: ToolInput) -> Result<String, String> {
        let ToolInput::Map(fields) = input else {
            return Err("Error: expected an object".to_string());
        };
        let mut project = self.project.write().await;
        let ignored = project
            .update(&fields)
            .map_err(|e| format!("Error updating project context: {}", e))?;
        let mut out = format!("Project context updated: {}", *project);
        if !ignored.is_empty() {
            out.push_str(&format!(" (ignored unknown fields: {})", ignored.join(", ")));
        }
        Ok(out)
    }
}
