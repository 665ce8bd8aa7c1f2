//! `execute_python_code`: the sub-agent's only tool

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::registry::{Tool, ToolError};
use crate::agent::prompts::EXECUTE_CODE_TOOL;
use crate::sandbox::CodeSandbox;

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    #[serde(default)]
    code: String,
}

/// Runs model-written code in the sandbox against one log file.
///
/// The file is fixed at construction; the model only controls the code.
pub struct ExecuteCodeTool {
    sandbox: Arc<dyn CodeSandbox>,
    log_file_path: PathBuf,
    description: String,
}

impl ExecuteCodeTool {
    pub fn new(sandbox: Arc<dyn CodeSandbox>, log_file_path: impl Into<PathBuf>) -> Self {
        let description = format!(
            "Execute Python code in an isolated sandbox. The log file is available read-only at '{}'. \
             There is no network access. The code must print its result to stdout.",
            sandbox.mount_target()
        );
        Self {
            sandbox,
            log_file_path: log_file_path.into(),
            description,
        }
    }
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn name(&self) -> &str {
        EXECUTE_CODE_TOOL
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Complete Python program to run"
                }
            },
            "required": ["code"]
        })
    }

    async fn invoke(&self, arguments: Value) -> Result<String, ToolError> {
        let args: ExecuteArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArgs(e.to_string()))?;
        if args.code.trim().is_empty() {
            return Err(ToolError::InvalidArgs("'code' must not be empty".to_string()));
        }

        let result = self.sandbox.execute(&args.code, &self.log_file_path).await;
        if result.is_success() {
            Ok(result.content())
        } else {
            Err(ToolError::ExecutionFailed(result.content()))
        }
    }
}
