//! Ollama Chat API with tool calling support
//!
//! This module is the completion-service boundary of the agent. The loops only
//! ever see the [`CompletionService`] trait; [`ChatClient`] implements it
//! against Ollama's `/api/chat` endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Author of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    /// The human asking questions
    User,
    Assistant,
    /// Output of a tool call, correlated by `tool_call_id`
    Tool,
}

/// A message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Assistant message requesting the given tool calls
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut message = Self::with_role(Role::Assistant, content);
        message.tool_calls = Some(calls);
        message
    }

    /// Tool-result message answering the call with id `call_id`
    pub fn tool(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut message = Self::with_role(Role::Tool, content);
        message.tool_call_id = Some(call_id.into());
        message.tool_name = Some(tool_name.into());
        message
    }

    /// Native tool calls carried by this message (empty if none)
    pub fn requested_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }

    /// Give every tool call a usable correlation id.
    ///
    /// Ollama omits ids entirely and some OpenAI-compatible servers send empty
    /// strings; either way the dispatcher needs one id per call.
    pub fn normalize_tool_calls(&mut self) {
        if let Some(calls) = self.tool_calls.as_mut() {
            for call in calls.iter_mut() {
                if call.id.trim().is_empty() {
                    call.id = new_call_id();
                }
            }
        }
    }
}

/// A tool call from the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id, echoed back in the matching tool-result message
    #[serde(default = "new_call_id")]
    pub id: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: new_call_id(),
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Function call details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default = "empty_arguments", deserialize_with = "arguments_from_any")]
    pub arguments: Value,
}

fn new_call_id() -> String {
    format!("call_{}", Uuid::now_v7().simple())
}

fn empty_arguments() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Accept arguments either as a JSON object or as a JSON-encoded string.
fn arguments_from_any<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(match raw {
        Value::Null => empty_arguments(),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => Value::String(text),
        },
        other => other,
    })
}

/// Tool definition for the model
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String, // Always "function"
    pub function: ToolFunction,
}

impl ToolDefinition {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: ToolFunction {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Function specification for a tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value, // JSON Schema
}

/// Response from /api/chat
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub eval_count: u32,
    #[serde(default)]
    pub eval_duration: u64,
}

/// Completion-service infrastructure failure.
///
/// Always fatal for the loop that observed it.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("completion service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("empty response from completion service")]
    EmptyResponse,

    #[error("completion service unavailable: {0}")]
    Unavailable(String),
}

/// The language-model boundary used by both agent loops
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Produce one assistant reply for `system_prompt` followed by `messages`.
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, ChatError>;

    /// Model name, for logs and transcripts
    fn model(&self) -> &str {
        "unknown"
    }
}

/// Connection settings for an Ollama server
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL of the server (e.g., "http://localhost:11434")
    pub base_url: String,
    /// Model to use (e.g., "qwen3")
    pub model: String,
    /// Sampling temperature; 0.0 keeps tool selection deterministic
    pub temperature: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen3".to_string(),
            temperature: 0.0,
        }
    }
}

/// Client for Ollama's /api/chat endpoint with tool support
#[derive(Clone)]
pub struct ChatClient {
    config: ChatConfig,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<Value, ChatError> {
        let mut conversation = Vec::with_capacity(messages.len() + 1);
        conversation.push(ChatMessage::system(system_prompt));
        conversation.extend_from_slice(messages);

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": conversation,
            "stream": false,
            "options": {
                "temperature": self.config.temperature
            }
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }
        Ok(body)
    }
}

#[async_trait]
impl CompletionService for ChatClient {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, ChatError> {
        let endpoint = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        let body = self.request_body(system_prompt, messages, tools)?;

        let response = self.client.post(&endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Err(ChatError::EmptyResponse);
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)?;
        let mut message = chat_response.message;
        message.normalize_tool_calls();
        Ok(message)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Try to parse tool calls from the response content text
///
/// Some models print the call as JSON instead of using the native
/// `tool_calls` field. Every balanced `{...}` object in the text of shape
/// `{"name": .., "arguments": {..}}` (or `"parameters"`) is returned.
pub fn parse_tool_calls_from_text(content: &str) -> Vec<ToolCall> {
    let content = content.trim();

    if let Some(call) = try_parse_tool_call(content) {
        return vec![call];
    }

    let mut calls = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(call) = start.take().and_then(|s| try_parse_tool_call(&content[s..=i])) {
                        calls.push(call);
                    }
                }
            }
            _ => {}
        }
    }

    calls
}

fn try_parse_tool_call(json_str: &str) -> Option<ToolCall> {
    if let Ok(value) = serde_json::from_str::<Value>(json_str) {
        return tool_call_from_value(&value);
    }

    let repaired = escape_code_quotes(json_str)?;
    serde_json::from_str::<Value>(&repaired)
        .ok()
        .and_then(|value| tool_call_from_value(&value))
}

/// Escape raw double quotes inside a `"code": "..."` string value.
///
/// Models frequently emit `{"name": "execute_python_code", "arguments":
/// {"code": "print("hi")"}}`, which is not valid JSON.
fn escape_code_quotes(json_str: &str) -> Option<String> {
    let marker = "\"code\": \"";
    let value_start = json_str.find(marker)? + marker.len();
    let rest = &json_str[value_start..];
    let value_len = rest.rfind("\"}")?;
    let raw = &rest[..value_len];

    let escaped = raw
        .replace("\\\"", "\u{FFFF}")
        .replace('"', "\\\"")
        .replace('\u{FFFF}', "\\\"");

    Some(format!(
        "{}{}{}",
        &json_str[..value_start],
        escaped,
        &rest[value_len..]
    ))
}

fn tool_call_from_value(value: &Value) -> Option<ToolCall> {
    let name = value.get("name").and_then(Value::as_str)?;
    let arguments = value
        .get("arguments")
        .or_else(|| value.get("parameters"))?;

    // Some models wrap every argument as {"value": ...}; unwrap those.
    let arguments = match arguments {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = match v.get("value") {
                        Some(inner) if v.as_object().map(|o| o.len()) == Some(1) => inner.clone(),
                        _ => v.clone(),
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| empty_arguments()),
        _ => return None,
    };

    Some(ToolCall::new(name, arguments))
}
