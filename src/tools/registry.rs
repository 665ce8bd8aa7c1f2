//! Tool registry and [`Tool`] trait definition.
//!
//! The registry is an immutable name → capability map built once at session
//! start. Each entry may carry an [`ArgumentHook`] that rewrites the model's
//! arguments before invocation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::agent::{Conversation, LogContext};
use crate::ollama::ToolDefinition;

/// Per-call tool failure. Always converted to a failure tool result by the
/// dispatcher; never propagated past it.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The arguments provided to the tool are invalid
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The tool ran but could not produce a result
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The semantic-search backend failed
    #[error("search failed: {0}")]
    Search(String),

    /// The delegated analysis could not complete
    #[error("analysis failed: {0}")]
    Analysis(String),
}

/// A capability the model can invoke by name
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to call this tool
    fn name(&self) -> &str;

    /// When and how to use the tool, surfaced to the model
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object
    fn parameters(&self) -> Value;

    /// Run the tool. Output is plain text fed back to the model.
    async fn invoke(&self, arguments: Value) -> Result<String, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(self.name(), self.description(), self.parameters())
    }
}

/// What a hook may consult when rewriting arguments
pub struct DispatchContext<'a> {
    pub conversation: &'a Conversation,
    pub log_context: &'a LogContext,
}

/// Pre-invocation argument rewrite, registered for one tool only.
///
/// This is a compatibility shim for tools the model is known to call with
/// malformed arguments, not a general dispatch policy.
pub trait ArgumentHook: Send + Sync {
    fn rewrite(&self, arguments: Value, ctx: &DispatchContext<'_>) -> Value;
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    hook: Option<Arc<dyn ArgumentHook>>,
}

/// Immutable set of tools available to one loop
pub struct ToolRegistry {
    entries: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.entries[i].tool)
    }

    pub fn hook(&self, name: &str) -> Option<&Arc<dyn ArgumentHook>> {
        self.index
            .get(name)
            .and_then(|&i| self.entries[i].hook.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.tool.name()).collect()
    }

    /// Schemas sent to the completion service, in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(|e| e.tool.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    entries: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistryBuilder {
    pub fn register(self, tool: Arc<dyn Tool>) -> Self {
        self.insert(RegisteredTool { tool, hook: None })
    }

    pub fn register_with_hook(self, tool: Arc<dyn Tool>, hook: Arc<dyn ArgumentHook>) -> Self {
        self.insert(RegisteredTool {
            tool,
            hook: Some(hook),
        })
    }

    fn insert(mut self, entry: RegisteredTool) -> Self {
        let name = entry.tool.name().to_string();
        match self.index.get(&name) {
            Some(&i) => {
                warn!(tool = %name, "Tool registered twice; keeping the latest");
                self.entries[i] = entry;
            }
            None => {
                self.index.insert(name, self.entries.len());
                self.entries.push(entry);
            }
        }
        self
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            entries: self.entries,
            index: self.index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "echo the arguments"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, arguments: Value) -> Result<String, ToolError> {
            Ok(arguments.to_string())
        }
    }

    struct Blank;

    impl ArgumentHook for Blank {
        fn rewrite(&self, _arguments: Value, _ctx: &DispatchContext<'_>) -> Value {
            json!({})
        }
    }

    #[test]
    fn test_lookup_by_name() {
        let registry = ToolRegistry::builder()
            .register(Arc::new(Echo("query_tool")))
            .build();
        assert!(registry.contains("query_tool"));
        assert!(registry.get("query_tool").is_some());
        assert!(registry.get("nonexistent_tool").is_none());
        assert!(registry.hook("query_tool").is_none());
    }

    #[test]
    fn test_definitions_keep_registration_order() {
        let registry = ToolRegistry::builder()
            .register(Arc::new(Echo("b_tool")))
            .register(Arc::new(Echo("a_tool")))
            .build();
        let names: Vec<String> = registry
            .definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(names, vec!["b_tool", "a_tool"]);
        assert_eq!(registry.names(), vec!["b_tool", "a_tool"]);
    }

    #[test]
    fn test_duplicate_name_replaces_entry() {
        let registry = ToolRegistry::builder()
            .register(Arc::new(Echo("dup")))
            .register_with_hook(Arc::new(Echo("dup")), Arc::new(Blank))
            .build();
        assert_eq!(registry.len(), 1);
        assert!(registry.hook("dup").is_some());
    }
}
