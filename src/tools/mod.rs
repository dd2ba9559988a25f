pub mod call;
pub mod executor;
pub mod registry;
pub mod search;

pub use call::{ToolInvocation, ToolOutcome, ToolResult, ToolSpec};
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use search::{SearchTool, SEARCH_TOOL_NAME};
