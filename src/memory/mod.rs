//! 记忆层：对话 Transcript、上下文压缩、token 估算、项目上下文

pub mod compactor;
pub mod conversation;
pub mod project;
pub mod token_budget;

pub use compactor::{ContextCompactor, LlmSummarizer, Summarizer, FALLBACK_SUMMARY};
pub use conversation::{Message, Role, Transcript};
pub use project::{ProjectContext, SharedProjectContext};
pub use token_budget::TokenEstimator;
