//! Agent 构建器：统一的初始化逻辑
//!
//! 从 AppConfig 构建工具注册表（14 个工具共享同一个 Workspace、ProjectContext 与 ProcessSupervisor）、
//! LLM 客户端、上下文压缩器与 system prompt。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{ContextCompactor, LlmSummarizer, ProjectContext, SharedProjectContext};
use crate::process::ProcessSupervisor;
use crate::react::{build_system_prompt, load_persona, LoopSettings};
use crate::tools::{
    AppendFileTool, CheckProjectSetupTool, CreateDirectoryTool, DeleteFileTool,
    DetectProjectTypeTool, ListDirectoryTool, ListServersTool, ReadFileTool, RunCommandTool,
    StartServerTool, StopServerTool, ToolExecutor, ToolRegistry, UpdateProjectContextTool,
    WeatherTool, Workspace, WriteFileTool,
};

/// 按配置选择 LLM 后端；缺少 API Key 时回退到 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();
    let deepseek_key = std::env::var("DEEPSEEK_API_KEY").ok();

    match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
        "deepseek" if deepseek_key.is_some() || openai_key.is_some() => {
            tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
            Arc::new(create_deepseek_client(Some(&cfg.llm.model)))
        }
        "openai" if openai_key.is_some() => {
            tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                openai_key.as_deref(),
            ))
        }
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

pub struct AgentBuilder {
    config: AppConfig,
    workspace: PathBuf,
    llm: Option<Arc<dyn LlmClient>>,
    persona: Option<String>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig, workspace: PathBuf) -> Self {
        Self {
            config,
            workspace,
            llm: None,
            persona: None,
        }
    }

    /// 指定 LLM 客户端（测试中注入 ScriptedLlmClient）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 覆盖 [app].continuous
    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.config.app.continuous = continuous;
        self
    }

    /// 覆盖人设文本（默认读取 [app].system_prompt_path）
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// 构建工具注册表
    pub fn build_tool_registry(
        &self,
        workspace: &Workspace,
        project: &SharedProjectContext,
        supervisor: &Arc<ProcessSupervisor>,
    ) -> Result<ToolRegistry, AgentError> {
        let tools_cfg = &self.config.tools;
        let mut tools = ToolRegistry::new();

        tools.register(CreateDirectoryTool::new(workspace.clone()))?;
        tools.register(ReadFileTool::new(workspace.clone()))?;
        tools.register(WriteFileTool::new(workspace.clone(), project.clone()))?;
        tools.register(AppendFileTool::new(workspace.clone(), project.clone()))?;
        tools.register(DeleteFileTool::new(workspace.clone(), project.clone()))?;
        tools.register(ListDirectoryTool::new(workspace.clone()))?;
        tools.register(RunCommandTool::new(
            workspace.clone(),
            tools_cfg.command_timeout_secs,
        ))?;
        tools.register(WeatherTool::new(
            tools_cfg.weather_url.clone(),
            tools_cfg.weather_timeout_secs,
        ))?;
        tools.register(DetectProjectTypeTool::new(workspace.clone()))?;
        tools.register(CheckProjectSetupTool::new(workspace.clone()))?;
        tools.register(UpdateProjectContextTool::new(project.clone()))?;
        tools.register(StartServerTool::new(
            supervisor.clone(),
            workspace.clone(),
            project.clone(),
        ))?;
        tools.register(StopServerTool::new(supervisor.clone(), project.clone()))?;
        tools.register(ListServersTool::new(supervisor.clone()))?;

        Ok(tools)
    }

    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        self.llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config))
    }

    /// [compaction].enabled = false 时返回 None
    pub fn build_compactor(&self, llm: Arc<dyn LlmClient>) -> Option<ContextCompactor> {
        let cfg = &self.config.compaction;
        if !cfg.enabled {
            return None;
        }
        let summarizer = Arc::new(LlmSummarizer::new(llm, self.config.llm.timeouts.request));
        Some(ContextCompactor::from_config(summarizer, cfg))
    }

    pub fn build_components(self) -> Result<AgentComponents, AgentError> {
        std::fs::create_dir_all(&self.workspace)?;
        let workspace = Workspace::new(&self.workspace);
        let project = ProjectContext::shared();
        let supervisor = Arc::new(ProcessSupervisor::new(
            workspace.root(),
            self.config.servers.clone(),
        ));

        let registry = self.build_tool_registry(&workspace, &project, &supervisor)?;
        let persona = self.persona.clone().unwrap_or_else(|| {
            load_persona(self.config.app.system_prompt_path.as_deref())
        });
        let system_prompt = build_system_prompt(&persona, &registry.tool_descriptions());
        let executor = Arc::new(ToolExecutor::new(
            registry,
            self.config.tools.tool_timeout_secs,
        ));

        let llm = self.build_llm();
        let compactor = self.build_compactor(llm.clone());
        tracing::info!(
            workspace = %workspace.root().display(),
            tools = executor.tool_names().len(),
            compaction = compactor.is_some(),
            "agent components built"
        );

        Ok(AgentComponents {
            settings: LoopSettings::from_config(&self.config),
            llm,
            executor,
            supervisor,
            project,
            compactor,
            system_prompt,
            workspace,
            config: self.config,
        })
    }
}

/// 预构建的组件，交给 Session 组装编排循环
pub struct AgentComponents {
    pub llm: Arc<dyn LlmClient>,
    pub executor: Arc<ToolExecutor>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub project: SharedProjectContext,
    pub compactor: Option<ContextCompactor>,
    pub system_prompt: String,
    pub settings: LoopSettings,
    pub workspace: Workspace,
    pub config: AppConfig,
}

/// 便捷函数：加载配置并确定工作目录（配置 > 当前目录）
pub fn create_agent_builder(config_path: Option<PathBuf>) -> Result<AgentBuilder, AgentError> {
    let config = crate::config::load_config(config_path).map_err(|e| AgentError::Config(e.to_string()))?;
    let workspace = match config.app.workspace_root.clone() {
        Some(root) => root,
        None => std::env::current_dir()?.join("workspace"),
    };
    Ok(AgentBuilder::new(config, workspace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_registry_has_all_tools() {
        let dir = tempfile::tempdir().unwrap();
        let components = AgentBuilder::new(AppConfig::default(), dir.path().to_path_buf())
            .with_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new())))
            .build_components()
            .unwrap();
        let names = components.executor.tool_names();
        assert_eq!(names.len(), 14);
        for name in [
            "create_directory",
            "read_file",
            "write_file",
            "append_file",
            "delete_file",
            "list_directory",
            "run_command",
            "get_weather",
            "detect_project_type",
            "check_project_setup",
            "update_project_context",
            "start_server",
            "stop_server",
            "list_servers",
        ] {
            assert!(names.iter().any(|n| n == name), "missing {name}");
        }
        assert!(components.system_prompt.contains("- start_server:"));
        assert!(components.compactor.is_some());
    }

    #[test]
    fn test_compaction_can_be_disabled() {
        let mut cfg = AppConfig::default();
        cfg.compaction.enabled = false;
        let builder = AgentBuilder::new(cfg, std::env::temp_dir());
        assert!(builder
            .build_compactor(Arc::new(MockLlmClient))
            .is_none());
    }

    #[test]
    fn test_mock_provider() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        let llm = create_llm_from_config(&cfg);
        assert_eq!(llm.token_usage(), (0, 0, 0));
    }
}
