//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / input_shape / execute），由 ToolRegistry 按名注册与查找。
//! 启动时注册一次，之后只读；invoke 先做输入形状校验再调用，结果一律是给模型看的字符串。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;

/// 工具声明的输入形状
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputShape {
    /// 单个字符串，如 stop_server("dev")
    Text,
    /// 字符串到字符串的映射，如 write_file({path, content})
    Map,
    /// 两者皆可（工具自行解释）
    Any,
}

impl InputShape {
    pub fn accepts(&self, input: &ToolInput) -> bool {
        matches!(
            (self, input),
            (InputShape::Any, _)
                | (InputShape::Text, ToolInput::Text(_))
                | (InputShape::Map, ToolInput::Map(_))
        )
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputShape::Text => write!(f, "a string"),
            InputShape::Map => write!(f, "an object of string fields"),
            InputShape::Any => write!(f, "a string or an object"),
        }
    }
}

/// Action step 携带的工具输入：字符串或字符串映射
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolInput {
    Text(String),
    Map(BTreeMap<String, String>),
}

impl ToolInput {
    /// 从模型给出的 JSON 值构造；非字符串标量按 JSON 文本保存
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ToolInput::Text(String::new()),
            Value::String(s) => ToolInput::Text(s.clone()),
            Value::Object(map) => ToolInput::Map(
                map.iter()
                    .map(|(k, v)| {
                        let v = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), v)
                    })
                    .collect(),
            ),
            other => ToolInput::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ToolInput::Text(s) => Value::String(s.clone()),
            ToolInput::Map(m) => serde_json::json!(m),
        }
    }

    /// 映射中的字段（Text 输入时为 None）
    pub fn field(&self, key: &str) -> Option<&str> {
        match self {
            ToolInput::Map(m) => m.get(key).map(String::as_str),
            ToolInput::Text(_) => None,
        }
    }

    /// Text 输入本身，或映射中的 `key` 字段（兼容 "path" / {"path": ...} 两种写法）
    pub fn text_or_field(&self, key: &str) -> Option<&str> {
        match self {
            ToolInput::Text(s) => Some(s.as_str()),
            ToolInput::Map(m) => m.get(key).map(String::as_str),
        }
    }

    pub fn shape_name(&self) -> &'static str {
        match self {
            ToolInput::Text(_) => "a string",
            ToolInput::Map(_) => "an object",
        }
    }
}

impl From<&str> for ToolInput {
    fn from(s: &str) -> Self {
        ToolInput::Text(s.to_string())
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、输入形状、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（对应 step 中的 "function" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能与参数）
    fn description(&self) -> &str;

    fn input_shape(&self) -> InputShape;

    /// Ok / Err 都是可读字符串；Err 仅用于审计日志区分结果
    async fn execute(&self, input: ToolInput) -> Result<String, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名重复注册是启动期配置错误
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, AgentError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    /// 调用工具：未知工具、形状不符都返回描述性字符串而不是错误
    pub async fn invoke(&self, name: &str, input: ToolInput) -> Result<String, String> {
        let tool = match self.resolve(name) {
            Ok(t) => t,
            Err(_) => {
                return Err(format!(
                    "Tool '{}' not found. Available tools: {}",
                    name,
                    self.tool_names().join(", ")
                ))
            }
        };
        let shape = tool.input_shape();
        if !shape.accepts(&input) {
            return Err(format!(
                "Invalid input for tool '{}': expected {}, got {}",
                name,
                shape,
                input.shape_name()
            ));
        }
        tool.execute(input).await
    }

    /// 已注册工具名（排序，便于稳定输出）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 返回 (name, description) 列表，用于生成 prompt 中的 Available tools 段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tool_names()
            .into_iter()
            .filter_map(|name| {
                let desc = self.tools.get(&name)?.description().to_string();
                Some((name, desc))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
