//! 后台服务进程管理
//!
//! - **supervisor**: ProcessSupervisor（start / stop / list / drain_all）
//! - **types**: 登记项、状态与各操作结果
//! - **ports**: 命令分类、标记文件、端口推测与探测
//! - **signal**: 进程组信号

pub mod ports;
pub(crate) mod signal;
pub mod supervisor;
pub mod types;

pub use ports::ServerKind;
pub use supervisor::ProcessSupervisor;
pub use types::{
    DrainReport, ListReport, ProcessError, ProcessStatus, ServerDescriptor, StartOutcome,
    StartedServer, StopOutcome,
};
