//! System instructions for the orchestrator and the analysis sub-agent

use super::state::{ExecutionState, LogContext};

/// Name of the semantic search tool
pub const QUERY_TOOL: &str = "query_tool";
/// Name of the delegated-analysis tool
pub const ANALYZER_TOOL: &str = "python_analyzer_service";
/// Name of the sub-agent's only tool
pub const EXECUTE_CODE_TOOL: &str = "execute_python_code";

/// Orchestrator instruction for the current step
pub fn orchestrator_prompt(state: &ExecutionState) -> String {
    let ctx = state.context();
    format!(
        r#"You are an expert Site Reliability Engineer debugging production systems. Answer the user's questions about their logs accurately.

Representative log statements (structure hints, not the full log):
<log_list>
{samples}
</log_list>

Full log file for deep analysis:
<log_file_path>
{path}
</log_file_path>

Tools:
1. `{query}(text, k)` searches indexed log chunks semantically similar to `text`.
   Use it for vague or example-seeking questions ("what do database timeouts look like?").
2. `{analyzer}(query, log_file_path)` delegates to a code-writing analyst that can read the entire log file.
   Use it for counting, filtering by date or level, aggregation or correlation.
   Pass the user's original question as `query` and the path above as `log_file_path`.

Plan:
- If the log_list already answers the question, answer directly without tools.
- Otherwise pick the tool that fits and base your answer on its output.
- Tool errors are reported as tool output; you may retry with a different approach.

You may take at most {max} steps. Steps used so far: {count}.
When you have the answer, reply in plain text without calling a tool."#,
        samples = ctx.sample_block(),
        path = ctx.log_file_path.display(),
        query = QUERY_TOOL,
        analyzer = ANALYZER_TOOL,
        max = state.max_executions(),
        count = state.execution_count(),
    )
}

/// Sub-agent instruction for round `round` of `max_rounds`
pub fn analyst_prompt(ctx: &LogContext, mount_target: &str, round: usize, max_rounds: usize) -> String {
    format!(
        r#"You are an expert Python developer. Your only job is to write and execute code that answers the user's query about a log file.

The log file is always at '{mount}' inside the `{tool}` tool. It is read-only and there is no network access.
These representative lines show the structure of the log:
<log_list>
{samples}
</log_list>

Rules:
- Do not answer from memory. Always write and run code with `{tool}`.
- The code MUST print its result to stdout.
- If the code fails, read the error and fix it.

You may run code at most {max} times. Current round: {round}.
Once you have the output you need, reply with a concise summary of the result and do not call the tool again."#,
        mount = mount_target,
        tool = EXECUTE_CODE_TOOL,
        samples = ctx.sample_block(),
        max = max_rounds,
        round = round,
    )
}
