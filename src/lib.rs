//! Buzz - Rust 本地开发助手
//!
//! 模块划分：
//! - **agent**: Session 运行时（初始任务、循环组装、退出摘要）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、循环状态、优雅关闭、组件构建
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）
//! - **memory**: 对话 Transcript、上下文压缩、项目上下文
//! - **process**: 后台服务进程监管（启动、停止、列表、退出时 drain）
//! - **react**: Step 协议与编排主循环
//! - **tools**: 工具箱（文件、命令、天气、项目、服务）与执行器
//! - **ui**: 控制台渲染与 stdin 指令读取

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod process;
pub mod react;
pub mod tools;
pub mod ui;
