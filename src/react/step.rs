//! Step：模型单次输出的结构化单元
//!
//! 原始文本只在 parse_step 解析一次（提取 JSON → RawStep → 按 kind 校验必需字段），
//! 之后所有逻辑都匹配 Step 枚举，不再比较字符串。解析失败统一为 AgentError::Protocol。

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::ToolInput;

/// 已校验的 step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Plan {
        content: String,
    },
    Observe {
        content: String,
    },
    /// 与 plan 类似的过渡步骤，可附带下一步打算
    Continue {
        content: String,
        next_action: Option<String>,
    },
    Action {
        content: Option<String>,
        tool_name: String,
        tool_input: ToolInput,
    },
    /// 当前任务的最终结果
    Output {
        content: String,
        follow_up: Option<String>,
    },
}

/// step 字段允许的取值（仅用于生成 Schema）
#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(rename_all = "snake_case")]
enum StepKind {
    Plan,
    Action,
    Observe,
    Continue,
    Output,
}

/// 模型输出的 JSON 形状
#[derive(Deserialize, JsonSchema)]
struct RawStep {
    /// plan / action / observe / continue / output
    #[schemars(with = "StepKind")]
    step: String,
    /// 说明文字；action 可省略
    #[serde(default)]
    content: Option<String>,
    /// 工具名，仅 action
    #[serde(default, alias = "tool_name", alias = "tool")]
    function: Option<String>,
    /// 工具输入：字符串或字符串字段的对象，仅 action
    #[serde(default)]
    input: Option<Value>,
    /// 给用户的后续提问，仅 output
    #[serde(default, alias = "follow_up_prompt")]
    follow_up: Option<String>,
    /// 下一步打算，仅 continue
    #[serde(default)]
    next_action: Option<String>,
}

/// 从文本中取出 JSON 对象：优先 ```json 代码块，其次第一个 '{' 到最后一个 '}'
fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn required(field: Option<String>, kind: &str, name: &str) -> Result<String, AgentError> {
    field.ok_or_else(|| AgentError::Protocol(format!("{} step is missing '{}'", kind, name)))
}

/// 解析模型原始输出为 Step
pub fn parse_step(output: &str) -> Result<Step, AgentError> {
    let json = extract_json(output)
        .ok_or_else(|| AgentError::Protocol("no JSON object found in model output".to_string()))?;
    let raw: RawStep =
        serde_json::from_str(json).map_err(|e| AgentError::Protocol(e.to_string()))?;

    let kind = raw.step.trim().to_lowercase();
    let step = match kind.as_str() {
        "plan" => Step::Plan {
            content: required(raw.content, "plan", "content")?,
        },
        "observe" => Step::Observe {
            content: required(raw.content, "observe", "content")?,
        },
        "continue" => Step::Continue {
            content: required(raw.content, "continue", "content")?,
            next_action: raw.next_action,
        },
        "action" => {
            let tool_name = raw
                .function
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .ok_or_else(|| {
                    AgentError::Protocol("action step is missing 'function'".to_string())
                })?;
            Step::Action {
                content: raw.content,
                tool_name,
                tool_input: ToolInput::from_json(raw.input.as_ref().unwrap_or(&Value::Null)),
            }
        }
        "output" => Step::Output {
            content: required(raw.content, "output", "content")?,
            follow_up: raw.follow_up.filter(|f| !f.trim().is_empty()),
        },
        other => {
            return Err(AgentError::Protocol(format!(
                "unknown step kind '{}'",
                other
            )))
        }
    };
    Ok(step)
}

impl Step {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Step::Plan { .. } => "plan",
            Step::Observe { .. } => "observe",
            Step::Continue { .. } => "continue",
            Step::Action { .. } => "action",
            Step::Output { .. } => "output",
        }
    }

    /// 规范化 JSON（写入 Transcript 的 assistant 消息），只含该 kind 需要的字段
    pub fn to_json(&self) -> Value {
        match self {
            Step::Plan { content } | Step::Observe { content } => {
                serde_json::json!({ "step": self.kind_name(), "content": content })
            }
            Step::Continue {
                content,
                next_action,
            } => {
                let mut v = serde_json::json!({ "step": "continue", "content": content });
                if let Some(next) = next_action {
                    v["next_action"] = Value::String(next.clone());
                }
                v
            }
            Step::Action {
                content,
                tool_name,
                tool_input,
            } => {
                let mut v = serde_json::json!({
                    "step": "action",
                    "function": tool_name,
                    "input": tool_input.to_json(),
                });
                if let Some(c) = content {
                    v["content"] = Value::String(c.clone());
                }
                v
            }
            Step::Output { content, follow_up } => {
                let mut v = serde_json::json!({ "step": "output", "content": content });
                if let Some(f) = follow_up {
                    v["follow_up"] = Value::String(f.clone());
                }
                v
            }
        }
    }
}

/// step 的 JSON Schema（拼入 system prompt，减少格式错误）
pub fn step_schema_json() -> String {
    let schema = schema_for!(RawStep);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
