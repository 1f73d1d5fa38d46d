//! The tool plane: the `Tool` seam agents call through, the per-execution
//! tool-session scratchpad, the function sandbox pool, and the remote MCP
//! client.

mod mcp;
mod sandbox;
mod sessions;
mod traits;

pub use mcp::{McpHttpClient, McpTool, McpToolProxy};
pub use sandbox::{FunctionSandboxPool, ModuleKind, SandboxError, dependency_hash, detect_module_kind};
pub use sessions::{ToolResultRecord, ToolSessionManager};
pub use traits::{Tool, ToolOutcome};
