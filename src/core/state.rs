//! 编排循环状态
//!
//! AwaitingStep → {Planning, Acting, Observing, Concluded}；Concluded 在连续模式下可重新进入 AwaitingStep。

use serde::Serialize;

/// 编排循环当前所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LoopState {
    /// 等待模型给出下一步
    AwaitingStep,
    /// 处理 plan / continue
    Planning,
    /// 执行工具调用
    Acting,
    /// 处理 observe
    Observing,
    /// 收到 output
    Concluded,
}

/// 循环结束原因
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum TerminationReason {
    /// 收到 output 且未继续（非连续模式或用户结束）
    Completed,
    /// 单个任务达到最大步数
    MaxStepsReached,
    /// 外部取消（Ctrl+C / SIGTERM）
    Cancelled,
}
