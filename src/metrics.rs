//! Prometheus metrics for the agent loops, tool dispatch and the sandbox
//!
//! All collectors live in the default registry; [`encode_metrics`] renders the
//! text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Agent Loop Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finished orchestrator runs.
    ///
    /// Labels:
    /// - result: "answered", "cap_reached" or "error"
    pub static ref AGENT_RUNS: CounterVec = register_counter_vec!(
        "loglens_agent_runs_total",
        "Orchestrator runs by terminal result",
        &["result"]
    ).expect("failed to register AGENT_RUNS metric");

    /// THINK steps performed.
    ///
    /// Labels:
    /// - loop: "orchestrator" or "subagent"
    pub static ref AGENT_STEPS: CounterVec = register_counter_vec!(
        "loglens_agent_steps_total",
        "Completion-service round trips per loop",
        &["loop"]
    ).expect("failed to register AGENT_STEPS metric");

    /// Completion-service latency.
    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "loglens_llm_call_duration_seconds",
        "Completion-service call latency in seconds",
        &["loop"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).expect("failed to register LLM_CALL_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Tool Dispatch Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Tool calls resolved by the dispatcher.
    ///
    /// Labels:
    /// - tool: tool name as requested by the model
    /// - outcome: "success" or "failure"
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "loglens_tool_calls_total",
        "Tool calls by tool and outcome",
        &["tool", "outcome"]
    ).expect("failed to register TOOL_CALLS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Sandbox Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Sandbox runs by classified status.
    ///
    /// Labels:
    /// - status: "success", "error", "timeout", "launch_failed", "missing_file"
    pub static ref SANDBOX_EXECUTIONS: CounterVec = register_counter_vec!(
        "loglens_sandbox_executions_total",
        "Sandbox executions by status",
        &["status"]
    ).expect("failed to register SANDBOX_EXECUTIONS metric");

    /// Wall-clock time of sandbox runs, container start included.
    pub static ref SANDBOX_DURATION: Histogram = register_histogram!(
        "loglens_sandbox_duration_seconds",
        "Sandbox execution wall-clock time in seconds",
        vec![0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0]
    ).expect("failed to register SANDBOX_DURATION metric");
}

/// Render every registered metric in the Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
