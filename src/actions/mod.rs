//! 动作层：语法抽取、工具注册表、内置工具、执行器

pub mod executor;
pub mod grammar;
pub mod notes;
pub mod registry;
pub mod tools;

pub use executor::{render_feedback, ActionExecutor, ExecutionReport, ExecutionResult, Outcome};
pub use grammar::{extract_calls, parse_call, ActionCall, Literal};
pub use notes::NoteStore;
pub use registry::{Tool, ToolContext, ToolOutput, ToolRegistry};
pub use tools::standard_registry;
