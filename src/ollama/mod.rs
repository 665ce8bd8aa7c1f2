//! Ollama LLM integration module
//!
//! Provides the [`CompletionService`] boundary used by the agent loops and a
//! client for Ollama's `/api/chat` endpoint with tool calling.

pub mod tool_use;

// Re-export public types so callers can write `crate::ollama::ChatMessage`
pub use tool_use::{
    parse_tool_calls_from_text, ChatClient, ChatConfig, ChatError, ChatMessage, ChatResponse,
    CompletionService, FunctionCall, Role, ToolCall, ToolDefinition, ToolFunction,
};
