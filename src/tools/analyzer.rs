//! `python_analyzer_service`: delegates a question to the code-writing sub-agent

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::registry::{ArgumentHook, DispatchContext, Tool, ToolError};
use crate::agent::prompts::ANALYZER_TOOL;
use crate::agent::{LogContext, SubAgent};

/// `log_list` may arrive as an array of lines or as one block of text
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LogList {
    Lines(Vec<String>),
    Block(String),
}

impl LogList {
    fn into_lines(self) -> Vec<String> {
        match self {
            LogList::Lines(lines) => lines,
            LogList::Block(block) => block.lines().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzerArgs {
    #[serde(default)]
    query: String,
    #[serde(default)]
    log_file_path: Option<PathBuf>,
    #[serde(default)]
    log_list: Option<LogList>,
}

/// Runs a [`SubAgent`] for questions that need the whole log file
pub struct AnalyzerTool {
    subagent: Arc<SubAgent>,
    session: Arc<LogContext>,
}

impl AnalyzerTool {
    /// `session` supplies the log path and sample lines when the arguments omit them
    pub fn new(subagent: Arc<SubAgent>, session: Arc<LogContext>) -> Self {
        Self { subagent, session }
    }
}

#[async_trait]
impl Tool for AnalyzerTool {
    fn name(&self) -> &str {
        ANALYZER_TOOL
    }

    fn description(&self) -> &str {
        "Answer a complex question about the full log file by writing and running Python code against it. \
         Use for counting, filtering by date or level, aggregation and correlation. \
         Pass the user's question as `query` and the log file path as `log_file_path`."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The user's question, verbatim"
                },
                "log_file_path": {
                    "type": "string",
                    "description": "Path of the log file to analyze"
                },
                "log_list": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Representative log lines"
                }
            },
            "required": ["query", "log_file_path"]
        })
    }

    async fn invoke(&self, arguments: Value) -> Result<String, ToolError> {
        let args: AnalyzerArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArgs(e.to_string()))?;
        if args.query.trim().is_empty() {
            return Err(ToolError::InvalidArgs("'query' must not be empty".to_string()));
        }

        let log_file_path = args
            .log_file_path
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| self.session.log_file_path.clone());
        let sample_lines = args
            .log_list
            .map(LogList::into_lines)
            .filter(|lines| !lines.is_empty())
            .unwrap_or_else(|| self.session.sample_lines.clone());
        let context = LogContext::new(log_file_path, sample_lines);

        self.subagent
            .analyze(&args.query, &context.log_file_path, &context)
            .await
            .map_err(|e| ToolError::Analysis(e.to_string()))
    }
}

/// Replaces whatever the model sent for `python_analyzer_service` with the
/// original human request and the session's log context.
pub struct AnalyzerArgumentRepair;

impl ArgumentHook for AnalyzerArgumentRepair {
    fn rewrite(&self, arguments: Value, ctx: &DispatchContext<'_>) -> Value {
        let query = ctx.conversation.first_user_message().unwrap_or_default();
        debug!(discarded = %arguments, "Repairing analyzer arguments");
        json!({
            "query": query,
            "log_file_path": ctx.log_context.log_file_path,
            "log_list": ctx.log_context.sample_lines,
        })
    }
}
