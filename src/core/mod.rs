//! 核心层：错误与恢复、循环状态、优雅关闭、组件构建

pub mod builder;
pub mod error;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use builder::{create_agent_builder, create_llm_from_config, AgentBuilder, AgentComponents};
pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{LoopState, TerminationReason};
