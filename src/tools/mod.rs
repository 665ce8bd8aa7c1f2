//! Tools the agent loops can call
//!
//! | Tool | Loop | Backed by |
//! |------|------|-----------|
//! | `query_tool` | orchestrator | [`SemanticSearch`] |
//! | `python_analyzer_service` | orchestrator | [`SubAgent`](crate::agent::SubAgent) |
//! | `execute_python_code` | sub-agent | [`CodeSandbox`](crate::sandbox::CodeSandbox) |

pub mod analyzer;
pub mod execute;
pub mod registry;
pub mod search;

pub use analyzer::{AnalyzerArgumentRepair, AnalyzerTool};
pub use execute::ExecuteCodeTool;
pub use registry::{
    ArgumentHook, DispatchContext, Tool, ToolError, ToolRegistry, ToolRegistryBuilder,
};
pub use search::{
    LineScanSearch, SearchError, SearchHit, SemanticSearch, SemanticSearchTool, DEFAULT_TOP_K,
};
