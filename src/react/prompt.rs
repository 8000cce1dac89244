//! System prompt 组装：人设/流程说明 + Available tools + step JSON Schema
//!
//! 人设文本可由 [app].system_prompt_path 指定的文件替换。

use std::path::Path;

use crate::react::step_schema_json;

/// 默认人设与工作流说明
pub const DEFAULT_PERSONA: &str = r#"You are a local development assistant. You help the user create, modify and run projects inside the workspace directory.

WORKFLOW
You work in steps. Every reply is exactly ONE JSON object with a "step" field:
- plan: analyse the request and decide what to do next ("content").
- action: call exactly one tool ("function" and "input"). Never chain several tools in one step.
- observe: reflect on the latest tool result ("content").
- continue: optional progress note with "next_action".
- output: the final result for the current request ("content"), optionally "follow_up" with a question for the user.

Tool results come back as {"step": "observe", "content": "..."} messages from the tool layer; treat them as ground truth.

RULES
1. Reply with one JSON object and nothing else.
2. Wait for the observation of an action before planning the next one.
3. Use start_server for long-running dev servers (npm run dev, npm start); use run_command only for commands that finish.
4. Check a project with check_project_setup before starting it; run "npm install" when dependencies are missing.
5. Keep the project context current with update_project_context.
6. For plain conversational questions answer directly with an output step.
7. After finishing a request, offer follow-up improvements via "follow_up"."#;

/// 由人设、工具列表与 Schema 拼出完整 system prompt
pub fn build_system_prompt(persona: &str, tool_descriptions: &[(String, String)]) -> String {
    let tool_list = tool_descriptions
        .iter()
        .map(|(name, desc)| format!("- {}: {}", name, desc))
        .collect::<Vec<_>>()
        .join("\n");
    let tools_section = if tool_list.is_empty() {
        String::new()
    } else {
        format!("\n\nAvailable tools:\n{}\n", tool_list)
    };
    let schema = step_schema_json();
    if schema.is_empty() {
        format!("{}{}", persona, tools_section)
    } else {
        format!(
            "{}{}\n\n## Step JSON Schema (you must output valid JSON matching this)\n```json\n{}\n```",
            persona, tools_section, schema
        )
    }
}

/// 读取自定义人设；文件不存在或读取失败时用默认人设
pub fn load_persona(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_PERSONA.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => content,
        Ok(_) => DEFAULT_PERSONA.to_string(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read system prompt, using default");
            DEFAULT_PERSONA.to_string()
        }
    }
}
