//! Orchestrator - the bounded THINK / ACT loop
//!
//! The Orchestrator owns one [`ExecutionState`] per run, prompts the
//! completion service once per step and hands tool calls to the
//! [`Dispatcher`]. The step cap is checked before every THINK, so a run
//! always ends within `max_executions` completion calls.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::conversation::Conversation;
use super::dispatcher::{Dispatcher, ToolResult};
use super::prompts::orchestrator_prompt;
use super::state::{ExecutionState, LogContext};
use crate::metrics::{AGENT_RUNS, AGENT_STEPS, LLM_CALL_DURATION};
use crate::ollama::{ChatError, CompletionService};
use crate::tools::{DispatchContext, ToolRegistry};

/// Configuration for the orchestrator loop
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum THINK steps (completion calls) per run
    pub max_executions: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_executions: 8 }
    }
}

/// The only error that escapes a loop. Tool and sandbox failures are
/// reported to the model instead.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("completion service failed: {0}")]
    Completion(#[from] ChatError),
}

/// How a run reached DONE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The model replied without requesting a tool
    Answered,
    /// `max_executions` steps were used up
    CapReached,
}

impl Completion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completion::Answered => "answered",
            Completion::CapReached => "cap_reached",
        }
    }
}

/// Routing decision after one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Tool calls were dispatched; THINK again
    Continue { tool_calls: usize },
    Done(Completion),
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Text shown to the user
    pub final_answer: String,
    /// THINK steps performed
    pub steps: usize,
    /// Tool calls dispatched across all steps
    pub tool_calls: usize,
    pub completion: Completion,
    /// Correlates logs and spans of this run
    pub trace_id: String,
}

/// Bounded agent loop over one completion service and one tool registry
pub struct Orchestrator {
    completion: Arc<dyn CompletionService>,
    dispatcher: Dispatcher,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        registry: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            completion,
            dispatcher: Dispatcher::new(registry),
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// One START/THINK/ACT transition.
    ///
    /// Returns `Done(CapReached)` without calling the completion service when
    /// the cap is already used up. Otherwise prompts once, appends the reply,
    /// and dispatches any tool calls it carries before returning.
    pub async fn step(
        &self,
        state: &mut ExecutionState,
        conversation: &mut Conversation,
    ) -> Result<Decision, AgentError> {
        if state.is_exhausted() {
            return Ok(Decision::Done(Completion::CapReached));
        }

        let prompt = orchestrator_prompt(state);
        state.advance();
        let step = state.execution_count();
        AGENT_STEPS.with_label_values(&["orchestrator"]).inc();

        let llm_span = info_span!(
            "llm_call",
            step,
            model = %self.completion.model(),
            otel.name = "llm_call"
        );
        let started = Instant::now();
        let reply = self
            .completion
            .complete(&prompt, conversation.messages(), &self.dispatcher.registry().definitions())
            .instrument(llm_span)
            .await;
        let elapsed = started.elapsed().as_secs_f64();
        LLM_CALL_DURATION
            .with_label_values(&["orchestrator"])
            .observe(elapsed);
        let mut reply = reply?;

        let calls = self.dispatcher.take_calls(&mut reply);
        debug!(step, duration_ms = elapsed * 1000.0, tool_calls = calls.len(), "LLM call completed");
        conversation.push(reply);

        if calls.is_empty() {
            return Ok(Decision::Done(Completion::Answered));
        }

        for call in &calls {
            info!(step, tool = %call.name(), call_id = %call.id, "Tool requested");
        }
        let results = {
            let ctx = DispatchContext {
                conversation: &*conversation,
                log_context: state.context(),
            };
            self.dispatcher.dispatch(&calls, &ctx).await
        };
        conversation.extend(results.iter().map(ToolResult::to_message));

        Ok(Decision::Continue {
            tool_calls: calls.len(),
        })
    }

    /// Drive `conversation` to DONE with a fresh step budget.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        context: Arc<LogContext>,
    ) -> Result<RunOutcome, AgentError> {
        let trace_id = Uuid::now_v7().to_string();
        let root_span = info_span!(
            "agent_run",
            trace_id = %trace_id,
            max_executions = self.config.max_executions,
            otel.name = "agent_run"
        );

        async {
            info!(trace_id = %trace_id, "Starting agent run");
            let mut state = ExecutionState::new(self.config.max_executions, context);
            let mut tool_calls = 0;

            let completion = loop {
                match self.step(&mut state, conversation).await {
                    Ok(Decision::Continue { tool_calls: n }) => tool_calls += n,
                    Ok(Decision::Done(completion)) => break completion,
                    Err(e) => {
                        warn!(trace_id = %trace_id, error = %e, "Agent run aborted");
                        AGENT_RUNS.with_label_values(&["error"]).inc();
                        return Err(e);
                    }
                }
            };

            let final_answer = match completion {
                Completion::Answered => conversation
                    .last_assistant()
                    .map(|m| m.content.clone())
                    .unwrap_or_default(),
                Completion::CapReached => {
                    warn!(trace_id = %trace_id, steps = state.execution_count(), "Step limit reached");
                    conversation
                        .last_assistant_text()
                        .map(str::to_string)
                        .unwrap_or_else(|| {
                            format!(
                                "I could not reach a final answer within the limit of {} steps.",
                                state.max_executions()
                            )
                        })
                }
            };

            AGENT_RUNS.with_label_values(&[completion.as_str()]).inc();
            info!(
                trace_id = %trace_id,
                steps = state.execution_count(),
                tool_calls,
                completion = completion.as_str(),
                "Agent run finished"
            );

            Ok(RunOutcome {
                final_answer,
                steps: state.execution_count(),
                tool_calls,
                completion,
                trace_id: trace_id.clone(),
            })
        }
        .instrument(root_span)
        .await
    }
}
