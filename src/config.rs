//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BUZZ__*` 覆盖（双下划线表示嵌套，如 `BUZZ__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub compaction: CompactionSection,
    pub tools: ToolsSection,
    pub servers: ServersSection,
}

/// [app] 段：工作目录、连续模式、system prompt 文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// output 之后是否继续询问用户新指令
    pub continuous: bool,
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            workspace_root: None,
            continuous: true,
            system_prompt_path: None,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock；无 API Key 时回退到 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次 LLM 请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 120 }
    }
}

/// [agent] 段：循环安全上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 每个任务的最大步数（连续模式下新指令重新计数）
    pub max_steps: usize,
    /// 单步内协议错误 / LLM 错误的最大重试次数
    pub max_protocol_retries: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_protocol_retries: 3,
        }
    }
}

/// [compaction] 段：上下文压缩阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompactionSection {
    pub enabled: bool,
    /// 消息条数超过此值时压缩
    pub max_entries: usize,
    /// 可选：估算 token 超过此值时也压缩
    pub max_tokens: Option<usize>,
    /// 摘要最大字符数
    pub summary_max_chars: usize,
}

impl Default for CompactionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 15,
            max_tokens: None,
            summary_max_chars: 2000,
        }
    }
}

/// [tools] 段：工具超时与外部服务
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用的全局兜底超时（秒），需大于服务启动等待与停止等待
    pub tool_timeout_secs: u64,
    /// run_command 的固定超时（秒）
    pub command_timeout_secs: u64,
    pub weather_url: String,
    pub weather_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 600,
            command_timeout_secs: 300,
            weather_url: "https://wttr.in".to_string(),
            weather_timeout_secs: 10,
        }
    }
}

/// [servers] 段：后台服务启动 / 停止的等待时间
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServersSection {
    /// 打包器类 dev server（vite 等）启动后的等待
    pub bundler_startup_wait_ms: u64,
    pub default_startup_wait_ms: u64,
    /// SIGTERM 后等待退出的时间
    pub stop_grace_ms: u64,
    /// SIGKILL 后等待回收的时间
    pub kill_wait_ms: u64,
    /// 端口探测连接超时
    pub port_probe_ms: u64,
    /// 服务 stdout/stderr 日志目录，未设置时用系统临时目录
    pub log_dir: Option<PathBuf>,
}

impl Default for ServersSection {
    fn default() -> Self {
        Self {
            bundler_startup_wait_ms: 4000,
            default_startup_wait_ms: 3000,
            stop_grace_ms: 5000,
            kill_wait_ms: 2000,
            port_probe_ms: 300,
            log_dir: None,
        }
    }
}

impl ServersSection {
    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("buzz-servers"))
    }
}

/// 从 config 目录加载配置，环境变量 BUZZ__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BUZZ__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BUZZ")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert!(cfg.app.continuous);
        assert_eq!(cfg.agent.max_steps, 50);
        assert_eq!(cfg.compaction.max_entries, 15);
        assert_eq!(cfg.servers.bundler_startup_wait_ms, 4000);
        assert_eq!(cfg.servers.default_startup_wait_ms, 3000);
        assert_eq!(cfg.tools.weather_url, "https://wttr.in");
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buzz.toml");
        std::fs::write(
            &path,
            "[compaction]\nmax_entries = 30\n\n[servers]\nstop_grace_ms = 100\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.compaction.max_entries, 30);
        assert!(cfg.compaction.enabled);
        assert_eq!(cfg.servers.stop_grace_ms, 100);
        assert_eq!(cfg.servers.kill_wait_ms, 2000);
    }
}
