//! loglens - an LLM agent that answers questions about log files
//!
//! The agent alternates between asking a model what to do and running the
//! tools it picks, under a hard step cap. One tool hands the question to a
//! nested agent that writes Python and runs it in a locked-down container
//! with the log file mounted read-only.
//!
//! # Modules
//!
//! - `agent` - orchestrator loop, tool dispatcher, analysis sub-agent, transcripts
//! - `tools` - tool registry and the `query_tool` / `python_analyzer_service` /
//!   `execute_python_code` tools
//! - `sandbox` - container-backed execution of untrusted code
//! - `ollama` - completion service client for Ollama `/api/chat`
//! - `metrics` - Prometheus metrics
//! - `tracing` - logging and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use loglens::agent::{Conversation, LogContext, Orchestrator, OrchestratorConfig};
//!
//! let orchestrator = Orchestrator::new(completion, registry, OrchestratorConfig::default());
//! let mut conversation = Conversation::from_user("How many ERROR lines are there?");
//! let outcome = orchestrator.run(&mut conversation, Arc::new(context)).await?;
//! println!("{}", outcome.final_answer);
//! ```

pub mod agent;
pub mod metrics;
pub mod ollama;
pub mod sandbox;
pub mod tools;
pub mod tracing;

pub use agent::{LogContext, Orchestrator, OrchestratorConfig, SubAgent, SubAgentConfig};
pub use sandbox::{ContainerSandbox, ResourceLimits, SandboxConfig};
