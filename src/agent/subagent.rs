//! Nested analysis loop behind `python_analyzer_service`
//!
//! A smaller copy of the orchestrator loop with one tool (code execution) and
//! its own round cap. The outer loop sees the whole run as one tool call.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, info_span, Instrument};

use super::conversation::Conversation;
use super::dispatcher::{Dispatcher, ToolResult};
use super::orchestrator::AgentError;
use super::prompts::analyst_prompt;
use super::state::LogContext;
use crate::metrics::{AGENT_STEPS, LLM_CALL_DURATION};
use crate::ollama::CompletionService;
use crate::sandbox::CodeSandbox;
use crate::tools::{DispatchContext, ExecuteCodeTool, ToolRegistry};

/// Returned when the analysis produced neither text nor tool output
const NO_OUTPUT: &str = "The analysis finished without producing any output.";

/// Configuration for the nested analysis loop
#[derive(Debug, Clone)]
pub struct SubAgentConfig {
    /// Completion rounds before the loop stops regardless of the model
    pub max_rounds: usize,
}

impl Default for SubAgentConfig {
    fn default() -> Self {
        Self { max_rounds: 4 }
    }
}

/// Code-writing analyst with a single sandboxed tool
pub struct SubAgent {
    completion: Arc<dyn CompletionService>,
    sandbox: Arc<dyn CodeSandbox>,
    config: SubAgentConfig,
}

impl SubAgent {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        sandbox: Arc<dyn CodeSandbox>,
        config: SubAgentConfig,
    ) -> Self {
        Self {
            completion,
            sandbox,
            config,
        }
    }

    pub fn config(&self) -> &SubAgentConfig {
        &self.config
    }

    /// Answer `query` by running code against `log_file_path`.
    ///
    /// Returns the last assistant text, or the last tool output when the
    /// model never wrote one. Only a completion failure is an error.
    pub async fn analyze(
        &self,
        query: &str,
        log_file_path: &Path,
        log_context: &LogContext,
    ) -> Result<String, AgentError> {
        let span = info_span!(
            "subagent",
            max_rounds = self.config.max_rounds,
            model = %self.completion.model(),
            otel.name = "subagent"
        );

        async {
            let registry = ToolRegistry::builder()
                .register(Arc::new(ExecuteCodeTool::new(
                    self.sandbox.clone(),
                    log_file_path,
                )))
                .build();
            let dispatcher = Dispatcher::new(Arc::new(registry));
            let tools = dispatcher.registry().definitions();

            let mut conversation = Conversation::from_user(query);
            let mut rounds = 0;

            while rounds < self.config.max_rounds {
                rounds += 1;
                let prompt = analyst_prompt(
                    log_context,
                    self.sandbox.mount_target(),
                    rounds,
                    self.config.max_rounds,
                );

                AGENT_STEPS.with_label_values(&["subagent"]).inc();
                let timer = LLM_CALL_DURATION
                    .with_label_values(&["subagent"])
                    .start_timer();
                let reply = self
                    .completion
                    .complete(&prompt, conversation.messages(), &tools)
                    .instrument(info_span!("llm_call", round = rounds, otel.name = "llm_call"))
                    .await;
                timer.observe_duration();
                let mut reply = reply?;

                let calls = dispatcher.take_calls(&mut reply);
                conversation.push(reply);
                if calls.is_empty() {
                    break;
                }

                debug!(round = rounds, calls = calls.len(), "Running analysis code");
                let ctx = DispatchContext {
                    conversation: &conversation,
                    log_context,
                };
                let results = dispatcher.dispatch(&calls, &ctx).await;
                conversation.extend(results.iter().map(ToolResult::to_message));
            }

            let summary = conversation
                .last_assistant_text()
                .or_else(|| conversation.last_tool_output())
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(NO_OUTPUT)
                .to_string();

            info!(rounds, summary_len = summary.len(), "Sub-agent finished");
            Ok(summary)
        }
        .instrument(span)
        .await
    }
}
