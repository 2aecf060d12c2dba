//! Tools the model can call during a run.

pub mod arguments;
pub mod registry;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use registry::ToolSet;
pub use tool::{AgentTool, AgentToolResult, FnTool, ToolContext, ToolUpdate, ToolUpdateFn};
pub use types::AgentToolParameters;
pub use validation::validate_arguments;
