//! 控制台前端：事件渲染与 stdin 指令读取

pub mod console;

pub use console::{render_event, spawn_renderer, StdinPrompter};
