//! StepExecutor：按 Step 类型分派
//!
//! plan / continue / observe 只产生展示事件；action 经 ToolExecutor 调用且仅调用一个工具，
//! 结果包装为 Tool 角色的 observe 消息交给循环追加；output 结束当前任务。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::core::LoopState;
use crate::memory::Message;
use crate::react::{ReactEvent, Step};
use crate::tools::ToolExecutor;

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 单步执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// 信息性步骤，直接进入下一轮
    Continue,
    /// action 的工具结果（Tool 角色 observe 消息）
    Observed(Message),
    /// 当前任务结束
    Concluded {
        content: String,
        follow_up: Option<String>,
    },
}

pub struct StepExecutor {
    tools: Arc<ToolExecutor>,
    event_tx: Option<UnboundedSender<ReactEvent>>,
}

impl StepExecutor {
    pub fn new(tools: Arc<ToolExecutor>) -> Self {
        Self {
            tools,
            event_tx: None,
        }
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn tools(&self) -> &ToolExecutor {
        &self.tools
    }

    /// step 对应的循环状态
    pub fn state_for(step: &Step) -> LoopState {
        match step {
            Step::Plan { .. } | Step::Continue { .. } => LoopState::Planning,
            Step::Observe { .. } => LoopState::Observing,
            Step::Action { .. } => LoopState::Acting,
            Step::Output { .. } => LoopState::Concluded,
        }
    }

    fn send(&self, ev: ReactEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    pub async fn execute(&self, step: &Step) -> StepOutcome {
        match step {
            Step::Plan { content } | Step::Observe { content } => {
                self.send(ReactEvent::Plan {
                    kind: step.kind_name().to_string(),
                    content: content.clone(),
                    next_action: None,
                });
                StepOutcome::Continue
            }
            Step::Continue {
                content,
                next_action,
            } => {
                self.send(ReactEvent::Plan {
                    kind: "continue".to_string(),
                    content: content.clone(),
                    next_action: next_action.clone(),
                });
                StepOutcome::Continue
            }
            Step::Action {
                tool_name,
                tool_input,
                ..
            } => {
                self.send(ReactEvent::ToolCall {
                    tool: tool_name.clone(),
                    input: tool_input.to_json(),
                });
                let result = self.tools.execute(tool_name, tool_input.clone()).await;
                let mut preview: String = result.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
                if result.chars().count() > OBSERVATION_PREVIEW_CHARS {
                    preview.push_str("...");
                }
                self.send(ReactEvent::Observation {
                    tool: tool_name.clone(),
                    preview,
                });
                StepOutcome::Observed(Message::observation(&result))
            }
            Step::Output { content, follow_up } => {
                self.send(ReactEvent::Output {
                    content: content.clone(),
                    follow_up: follow_up.clone(),
                });
                StepOutcome::Concluded {
                    content: content.clone(),
                    follow_up: follow_up.clone(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;
    use crate::tools::{ToolInput, ToolRegistry};

    fn executor() -> StepExecutor {
        StepExecutor::new(Arc::new(ToolExecutor::new(ToolRegistry::new(), 5)))
    }

    #[tokio::test]
    async fn test_informational_steps_continue() {
        let ex = executor();
        let plan = Step::Plan {
            content: "think".to_string(),
        };
        assert_eq!(ex.execute(&plan).await, StepOutcome::Continue);
        assert_eq!(StepExecutor::state_for(&plan), LoopState::Planning);
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_observation() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ex = executor().with_event_tx(tx);
        let step = Step::Action {
            content: None,
            tool_name: "frobnicate".to_string(),
            tool_input: ToolInput::Text(String::new()),
        };
        match ex.execute(&step).await {
            StepOutcome::Observed(msg) => {
                assert_eq!(msg.role, Role::Tool);
                assert!(msg.content.contains("not found"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(ReactEvent::ToolCall { .. })));
        assert!(matches!(rx.recv().await, Some(ReactEvent::Observation { .. })));
    }

    #[tokio::test]
    async fn test_output_concludes() {
        let ex = executor();
        let step = Step::Output {
            content: "done".to_string(),
            follow_up: Some("more?".to_string()),
        };
        assert_eq!(
            ex.execute(&step).await,
            StepOutcome::Concluded {
                content: "done".to_string(),
                follow_up: Some("more?".to_string())
            }
        );
    }
}
