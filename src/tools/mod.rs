pub mod executor;
pub mod filesystem;
pub mod project;
pub mod registry;
pub mod servers;
pub mod shell;
pub mod weather;

pub use executor::ToolExecutor;
pub use filesystem::{
    AppendFileTool, CreateDirectoryTool, DeleteFileTool, ListDirectoryTool, ReadFileTool,
    Workspace, WriteFileTool,
};
pub use project::{CheckProjectSetupTool, DetectProjectTypeTool, UpdateProjectContextTool};
pub use registry::{InputShape, Tool, ToolInput, ToolRegistry};
pub use servers::{ListServersTool, StartServerTool, StopServerTool};
pub use shell::RunCommandTool;
pub use weather::WeatherTool;
