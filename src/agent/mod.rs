//! Agent loops for log analysis
//!
//! # Architecture
//!
//! ```text
//! User question → Orchestrator ──► CompletionService (with tool schemas)
//!                      │ ▲
//!            ToolCalls │ │ ToolResults (one per call)
//!                      ▼ │
//!                  Dispatcher ──► query_tool ──► SemanticSearch
//!                      │
//!                      └──► python_analyzer_service
//!                              (args repaired from the conversation)
//!                                      │
//!                                      ▼
//!                               SubAgent loop ──► execute_python_code
//!                                                       │
//!                                                       ▼
//!                                          ContainerSandbox (no network,
//!                                          memory/cpu caps, timeout,
//!                                          log file mounted read-only)
//! ```
//!
//! The Orchestrator stops after `max_executions` THINK steps; the SubAgent
//! after `max_rounds`. Only completion-service failures end a run early.

pub mod conversation;
pub mod dispatcher;
pub mod orchestrator;
pub mod prompts;
pub mod sessions;
pub mod state;
pub mod subagent;

pub use conversation::Conversation;
pub use dispatcher::{Dispatcher, ToolOutcome, ToolResult};
pub use orchestrator::{
    AgentError, Completion, Decision, Orchestrator, OrchestratorConfig, RunOutcome,
};
pub use sessions::{Session, SessionStore, SessionSummary};
pub use state::{ExecutionState, LogContext};
pub use subagent::{SubAgent, SubAgentConfig};
