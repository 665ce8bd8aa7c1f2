//! Tool dispatcher: resolves, repairs and invokes one batch of tool calls
//!
//! ```text
//! batch of ToolCalls ──► lookup in ToolRegistry ──► not found ──► failure result
//!                              │
//!                              ▼
//!                     per-tool ArgumentHook (if registered)
//!                              │
//!                              ▼
//!                  tool.invoke(args)  (all calls concurrently)
//!                              │
//!              Ok ──► success  │  Err / panic ──► failure
//!                              ▼
//!               one ToolResult per call, in call order
//! ```
//!
//! Nothing raised by a tool crosses this boundary.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::Serialize;
use tracing::{debug, info_span, warn, Instrument};

use crate::metrics::TOOL_CALLS;
use crate::ollama::{parse_tool_calls_from_text, ChatMessage, ToolCall};
use crate::tools::{DispatchContext, ToolRegistry};

/// Whether a tool call produced a usable result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutcome {
    Success,
    Failure,
}

impl ToolOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolOutcome::Success => "success",
            ToolOutcome::Failure => "failure",
        }
    }
}

/// Result of exactly one tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, content: impl Into<String>) -> Self {
        Self::with_outcome(call, content, ToolOutcome::Success)
    }

    pub fn failure(call: &ToolCall, content: impl Into<String>) -> Self {
        Self::with_outcome(call, content, ToolOutcome::Failure)
    }

    fn with_outcome(call: &ToolCall, content: impl Into<String>, outcome: ToolOutcome) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name().to_string(),
            content: content.into(),
            outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ToolOutcome::Success
    }

    /// Tool-result message for the conversation
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::tool(&self.call_id, &self.tool_name, &self.content)
    }
}

/// Routes tool calls to the registry
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Tool calls requested by an assistant reply.
    ///
    /// Native calls win. Otherwise calls printed as JSON in the text are
    /// accepted, but only for registered tool names.
    pub fn requested_calls(&self, reply: &ChatMessage) -> Vec<ToolCall> {
        let native = reply.requested_calls();
        if !native.is_empty() {
            return native.to_vec();
        }

        parse_tool_calls_from_text(&reply.content)
            .into_iter()
            .filter(|call| self.registry.contains(call.name()))
            .collect()
    }

    /// [`requested_calls`](Self::requested_calls), recorded on the reply so
    /// every tool result in the conversation answers a call it carries.
    pub fn take_calls(&self, reply: &mut ChatMessage) -> Vec<ToolCall> {
        let calls = self.requested_calls(reply);
        if !calls.is_empty() && reply.requested_calls().is_empty() {
            reply.tool_calls = Some(calls.clone());
        }
        calls
    }

    /// Run a batch and wait for every call; one result per call, same order.
    pub async fn dispatch(&self, calls: &[ToolCall], ctx: &DispatchContext<'_>) -> Vec<ToolResult> {
        let span = info_span!("tool_dispatch", batch = calls.len(), otel.name = "tool_dispatch");
        join_all(calls.iter().map(|call| self.dispatch_one(call, ctx)))
            .instrument(span)
            .await
    }

    async fn dispatch_one(&self, call: &ToolCall, ctx: &DispatchContext<'_>) -> ToolResult {
        let name = call.name();

        let Some(tool) = self.registry.get(name) else {
            warn!(tool = %name, call_id = %call.id, "Model requested unknown tool");
            TOOL_CALLS.with_label_values(&["unknown", "failure"]).inc();
            return ToolResult::failure(call, format!("tool '{}' not found", name));
        };

        let arguments = match self.registry.hook(name) {
            Some(hook) => {
                debug!(tool = %name, original = %call.function.arguments, "Rewriting tool arguments");
                hook.rewrite(call.function.arguments.clone(), ctx)
            }
            None => call.function.arguments.clone(),
        };

        debug!(tool = %name, call_id = %call.id, "Invoking tool");
        let result = match AssertUnwindSafe(tool.invoke(arguments)).catch_unwind().await {
            Ok(Ok(content)) => ToolResult::success(call, content),
            Ok(Err(e)) => ToolResult::failure(call, format!("error running tool {}: {}", name, e)),
            Err(panic) => ToolResult::failure(
                call,
                format!("error running tool {}: {}", name, panic_message(panic.as_ref())),
            ),
        };

        if !result.is_success() {
            warn!(tool = %name, call_id = %call.id, error = %result.content, "Tool call failed");
        }
        TOOL_CALLS
            .with_label_values(&[name, result.outcome.as_str()])
            .inc();
        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("tool panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("tool panicked: {}", s)
    } else {
        "tool panicked".to_string()
    }
}
