//! 编排层：Step 协议、单步执行、system prompt 组装与主循环

pub mod events;
pub mod executor;
pub mod loop_;
pub mod prompt;
pub mod step;

pub use events::ReactEvent;
pub use executor::{StepExecutor, StepOutcome};
pub use loop_::{
    is_exit_reply, prompt_or_cancel, LoopOutcome, LoopSettings, OrchestrationLoop, ScriptedPrompter, UserPrompter,
    EXIT_SENTINELS,
};
pub use prompt::{build_system_prompt, load_persona, DEFAULT_PERSONA};
pub use step::{parse_step, step_schema_json, Step};
