//! Integration tests for the agent loops
//!
//! The completion service and the sandbox are replaced by scripted fakes so
//! the loop, dispatch and delegation behavior can be checked end to end.
//! Tests that need Ollama or Docker are marked #[ignore].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use loglens::agent::{
    AgentError, Completion, Conversation, Decision, ExecutionState, LogContext, Orchestrator,
    OrchestratorConfig, SubAgent, SubAgentConfig,
};
use loglens::ollama::{ChatConfig, ChatError, ChatMessage, CompletionService, Role, ToolCall, ToolDefinition};
use loglens::sandbox::{CodeSandbox, SandboxConfig, SandboxResult};
use loglens::tools::{
    AnalyzerArgumentRepair, AnalyzerTool, SearchError, SearchHit, SemanticSearch,
    SemanticSearchTool, Tool, ToolError, ToolRegistry,
};

const QUESTION: &str = "How many ERROR lines are there?";
const LOG_PATH: &str = "/var/log/app.log";

// ─────────────────────────────────────────────────────────────────────────────
// Fakes
// ─────────────────────────────────────────────────────────────────────────────

type Responder = dyn Fn(usize, &[ChatMessage]) -> Result<ChatMessage, ChatError> + Send + Sync;

/// Completion service driven by a closure of (1-based call number, messages)
struct ScriptedCompletion {
    respond: Box<Responder>,
    prompts: Mutex<Vec<String>>,
    transcripts: Mutex<Vec<Vec<ChatMessage>>>,
    offered_tools: Mutex<Vec<Vec<String>>>,
}

impl ScriptedCompletion {
    fn new(
        respond: impl Fn(usize, &[ChatMessage]) -> Result<ChatMessage, ChatError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            prompts: Mutex::new(Vec::new()),
            transcripts: Mutex::new(Vec::new()),
            offered_tools: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, ChatError> {
        let call = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(system_prompt.to_string());
            prompts.len()
        };
        self.transcripts.lock().unwrap().push(messages.to_vec());
        self.offered_tools
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.function.name.clone()).collect());
        (self.respond)(call, messages)
    }
}

/// Sandbox that records each run and prints a fixed stdout
struct FakeSandbox {
    runs: Mutex<Vec<(String, PathBuf)>>,
    stdout: String,
}

impl FakeSandbox {
    fn new(stdout: &str) -> Arc<Self> {
        Arc::new(Self {
            runs: Mutex::new(Vec::new()),
            stdout: stdout.to_string(),
        })
    }
}

#[async_trait]
impl CodeSandbox for FakeSandbox {
    async fn execute(&self, code: &str, file_to_mount: &Path) -> SandboxResult {
        self.runs
            .lock()
            .unwrap()
            .push((code.to_string(), file_to_mount.to_path_buf()));
        SandboxResult::Completed {
            stdout: self.stdout.clone(),
            stderr: String::new(),
            exit_code: 0,
            duration_ms: 1.0,
        }
    }

    fn mount_target(&self) -> &str {
        "/app/log.txt"
    }
}

/// Search backend that counts queries
#[derive(Default)]
struct CountingSearch {
    queries: AtomicUsize,
}

#[async_trait]
impl SemanticSearch for CountingSearch {
    async fn search(&self, text: &str, _k: usize) -> Result<Vec<SearchHit>, SearchError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(vec![SearchHit {
            text: format!("[ERROR] {}", text),
            score: 1.0,
            start_line: 1,
            end_line: 1,
            has_error: true,
        }])
    }
}

struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken_tool"
    }
    fn description(&self) -> &str {
        "always fails"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn invoke(&self, _arguments: Value) -> Result<String, ToolError> {
        Err(ToolError::ExecutionFailed("disk on fire".to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn context() -> Arc<LogContext> {
    Arc::new(LogContext::new(
        LOG_PATH,
        vec!["2024-01-01 10:00:02 [ERROR] database timeout".to_string()],
    ))
}

fn requesting(name: &str, arguments: Value) -> ChatMessage {
    ChatMessage::assistant_with_calls("", vec![ToolCall::new(name, arguments)])
}

fn search_registry(search: Arc<CountingSearch>) -> Arc<ToolRegistry> {
    Arc::new(
        ToolRegistry::builder()
            .register(Arc::new(SemanticSearchTool::new(search)))
            .register(Arc::new(BrokenTool))
            .build(),
    )
}

fn analyzer_registry(
    inner: Arc<ScriptedCompletion>,
    sandbox: Arc<FakeSandbox>,
    max_rounds: usize,
) -> Arc<ToolRegistry> {
    let subagent = Arc::new(SubAgent::new(inner, sandbox, SubAgentConfig { max_rounds }));
    Arc::new(
        ToolRegistry::builder()
            .register(Arc::new(SemanticSearchTool::new(Arc::new(CountingSearch::default()))))
            .register_with_hook(
                Arc::new(AnalyzerTool::new(subagent, context())),
                Arc::new(AnalyzerArgumentRepair),
            )
            .build(),
    )
}

fn orchestrator(
    completion: Arc<ScriptedCompletion>,
    registry: Arc<ToolRegistry>,
    max_executions: usize,
) -> Orchestrator {
    Orchestrator::new(completion, registry, OrchestratorConfig { max_executions })
}

fn tool_messages(conversation: &Conversation) -> Vec<&ChatMessage> {
    conversation
        .messages()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// A model that always asks for a tool is stopped after exactly 4 steps
#[tokio::test]
async fn test_cap_stops_tool_loop() {
    let completion = ScriptedCompletion::new(|_, _| Ok(requesting("query_tool", json!({"text": "timeout"}))));
    let search = Arc::new(CountingSearch::default());
    let agent = orchestrator(completion.clone(), search_registry(search.clone()), 4);

    let mut conversation = Conversation::from_user(QUESTION);
    let outcome = agent.run(&mut conversation, context()).await.unwrap();

    assert_eq!(outcome.completion, Completion::CapReached);
    assert_eq!(outcome.steps, 4);
    assert_eq!(outcome.tool_calls, 4);
    assert_eq!(completion.calls(), 4);
    assert_eq!(search.queries.load(Ordering::SeqCst), 4);
    assert!(outcome.final_answer.contains("4 steps"));
    // user + 4 × (assistant, tool)
    assert_eq!(conversation.len(), 9);
}

#[tokio::test]
async fn test_plain_reply_answers_in_one_step() {
    let completion = ScriptedCompletion::new(|_, _| Ok(ChatMessage::assistant("There are 12 errors.")));
    let agent = orchestrator(completion.clone(), search_registry(Arc::default()), 8);

    let mut conversation = Conversation::from_user(QUESTION);
    let outcome = agent.run(&mut conversation, context()).await.unwrap();

    assert_eq!(outcome.completion, Completion::Answered);
    assert_eq!(outcome.final_answer, "There are 12 errors.");
    assert_eq!(outcome.steps, 1);
    assert_eq!(outcome.tool_calls, 0);
    assert!(!outcome.trace_id.is_empty());

    let prompt = &completion.prompts.lock().unwrap()[0];
    assert!(prompt.contains(LOG_PATH));
    assert!(prompt.contains("at most 8 steps"));
    assert!(prompt.contains("Steps used so far: 0"));
}

/// The cap answer falls back to the last non-blank assistant text
#[tokio::test]
async fn test_cap_answer_uses_last_assistant_text() {
    let completion = ScriptedCompletion::new(|n, _| {
        Ok(ChatMessage::assistant_with_calls(
            format!("still looking ({})", n),
            vec![ToolCall::new("query_tool", json!({"text": "error"}))],
        ))
    });
    let agent = orchestrator(completion, search_registry(Arc::default()), 2);

    let mut conversation = Conversation::from_user(QUESTION);
    let outcome = agent.run(&mut conversation, context()).await.unwrap();
    assert_eq!(outcome.completion, Completion::CapReached);
    assert_eq!(outcome.final_answer, "still looking (2)");
}

#[tokio::test]
async fn test_step_counts_and_cap_skips_completion() {
    let completion = ScriptedCompletion::new(|_, _| Ok(requesting("query_tool", json!({"text": "db"}))));
    let agent = orchestrator(completion.clone(), search_registry(Arc::default()), 2);

    let mut state = ExecutionState::new(2, context());
    let mut conversation = Conversation::from_user(QUESTION);

    for expected in 1..=2 {
        let decision = agent.step(&mut state, &mut conversation).await.unwrap();
        assert_eq!(decision, Decision::Continue { tool_calls: 1 });
        assert_eq!(state.execution_count(), expected);
    }

    let decision = agent.step(&mut state, &mut conversation).await.unwrap();
    assert_eq!(decision, Decision::Done(Completion::CapReached));
    assert_eq!(state.execution_count(), 2);
    assert_eq!(completion.calls(), 2);
}

#[tokio::test]
async fn test_completion_failure_is_fatal() {
    let completion = ScriptedCompletion::new(|n, _| match n {
        1 => Ok(requesting("query_tool", json!({"text": "timeout"}))),
        _ => Err(ChatError::Unavailable("connection refused".to_string())),
    });
    let search = Arc::new(CountingSearch::default());
    let agent = orchestrator(completion.clone(), search_registry(search.clone()), 8);

    let mut conversation = Conversation::from_user(QUESTION);
    let err = agent.run(&mut conversation, context()).await.unwrap_err();

    assert!(matches!(err, AgentError::Completion(ChatError::Unavailable(_))));
    assert_eq!(completion.calls(), 2);
    assert_eq!(search.queries.load(Ordering::SeqCst), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch through the loop
// ─────────────────────────────────────────────────────────────────────────────

/// Unknown and failing tools become tool output; the loop carries on
#[tokio::test]
async fn test_failed_calls_are_reported_to_model() {
    let completion = ScriptedCompletion::new(|n, _| match n {
        1 => Ok(ChatMessage::assistant_with_calls(
            "",
            vec![
                ToolCall::new("nonexistent_tool", json!({})),
                ToolCall::new("broken_tool", json!({})),
                ToolCall::new("query_tool", json!({"text": "timeout"})),
            ],
        )),
        _ => Ok(ChatMessage::assistant("done")),
    });
    let agent = orchestrator(completion.clone(), search_registry(Arc::default()), 8);

    let mut conversation = Conversation::from_user(QUESTION);
    let outcome = agent.run(&mut conversation, context()).await.unwrap();
    assert_eq!(outcome.completion, Completion::Answered);
    assert_eq!(outcome.tool_calls, 3);

    let requested: Vec<String> = conversation.messages()[1]
        .requested_calls()
        .iter()
        .map(|c| c.id.clone())
        .collect();
    let results = tool_messages(&conversation);
    assert_eq!(results.len(), 3);
    for (id, result) in requested.iter().zip(&results) {
        assert_eq!(result.tool_call_id.as_ref(), Some(id));
    }

    assert_eq!(results[0].content, "tool 'nonexistent_tool' not found");
    assert_eq!(
        results[1].content,
        "error running tool broken_tool: execution failed: disk on fire"
    );
    assert!(results[2].content.contains("[ERROR] timeout"));

    // the model saw all three results before answering
    let second_transcript = &completion.transcripts.lock().unwrap()[1];
    assert_eq!(second_transcript.len(), 5);
}

/// Calls printed as JSON text are dispatched and recorded on the reply
#[tokio::test]
async fn test_text_tool_call_fallback() {
    let completion = ScriptedCompletion::new(|n, _| match n {
        1 => Ok(ChatMessage::assistant(
            r#"{"name": "query_tool", "arguments": {"text": "timeout"}}"#,
        )),
        _ => Ok(ChatMessage::assistant("found it")),
    });
    let search = Arc::new(CountingSearch::default());
    let agent = orchestrator(completion, search_registry(search.clone()), 8);

    let mut conversation = Conversation::from_user(QUESTION);
    let outcome = agent.run(&mut conversation, context()).await.unwrap();

    assert_eq!(outcome.final_answer, "found it");
    assert_eq!(search.queries.load(Ordering::SeqCst), 1);
    let call_id = &conversation.messages()[1].requested_calls()[0].id;
    assert_eq!(tool_messages(&conversation)[0].tool_call_id.as_ref(), Some(call_id));
}

// ─────────────────────────────────────────────────────────────────────────────
// Delegated analysis
// ─────────────────────────────────────────────────────────────────────────────

/// Empty analyzer arguments are rebuilt from the first human message and the
/// session log path, and the whole sub-agent run is one outer step
#[tokio::test]
async fn test_analyzer_arguments_repaired_and_counted_once() {
    let outer = ScriptedCompletion::new(|n, _| match n {
        1 => Ok(requesting("python_analyzer_service", json!({}))),
        _ => Ok(ChatMessage::assistant("The log has 3 ERROR lines.")),
    });
    let inner = ScriptedCompletion::new(|n, _| match n {
        1 => Ok(requesting(
            "execute_python_code",
            json!({"code": "print(sum('ERROR' in l for l in open('/app/log.txt')))"}),
        )),
        _ => Ok(ChatMessage::assistant("There are 3 errors.")),
    });
    let sandbox = FakeSandbox::new("3\n");
    let agent = orchestrator(outer.clone(), analyzer_registry(inner.clone(), sandbox.clone(), 4), 8);

    let mut conversation = Conversation::from_user(QUESTION);
    let outcome = agent.run(&mut conversation, context()).await.unwrap();

    assert_eq!(outcome.steps, 2);
    assert_eq!(outcome.final_answer, "The log has 3 ERROR lines.");
    assert_eq!(inner.calls(), 2);

    // the sub-agent was asked the original question
    let inner_first = &inner.transcripts.lock().unwrap()[0];
    assert_eq!(inner_first[0].content, QUESTION);
    assert!(inner.prompts.lock().unwrap()[0].contains("/app/log.txt"));
    assert_eq!(inner.offered_tools.lock().unwrap()[0], vec!["execute_python_code"]);

    // against the session's log file
    let runs = sandbox.runs.lock().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].1, PathBuf::from(LOG_PATH));

    assert_eq!(tool_messages(&conversation)[0].content, "There are 3 errors.");
}

/// The sub-agent stops at its own round cap and falls back to tool output
#[tokio::test]
async fn test_subagent_round_cap() {
    let inner = ScriptedCompletion::new(|_, _| Ok(requesting("execute_python_code", json!({"code": "print('partial')"}))));
    let sandbox = FakeSandbox::new("partial\n");
    let subagent = SubAgent::new(inner.clone(), sandbox.clone(), SubAgentConfig { max_rounds: 3 });

    let summary = subagent
        .analyze(QUESTION, Path::new(LOG_PATH), &context())
        .await
        .unwrap();

    assert_eq!(summary, "partial\n");
    assert_eq!(inner.calls(), 3);
    assert_eq!(sandbox.runs.lock().unwrap().len(), 3);

    let prompts = inner.prompts.lock().unwrap();
    assert!(prompts[2].contains("Current round: 3"));
}

/// A failing inner model is a tool failure for the outer loop, not a fatal error
#[tokio::test]
async fn test_subagent_failure_is_absorbed() {
    let outer = ScriptedCompletion::new(|n, _| match n {
        1 => Ok(requesting("python_analyzer_service", json!({"query": "<placeholder>"}))),
        _ => Ok(ChatMessage::assistant("The analysis service is unavailable.")),
    });
    let inner = ScriptedCompletion::new(|_, _| Err(ChatError::EmptyResponse));
    let agent = orchestrator(outer, analyzer_registry(inner, FakeSandbox::new(""), 4), 8);

    let mut conversation = Conversation::from_user(QUESTION);
    let outcome = agent.run(&mut conversation, context()).await.unwrap();

    assert_eq!(outcome.completion, Completion::Answered);
    let result = &tool_messages(&conversation)[0].content;
    assert!(result.starts_with("error running tool python_analyzer_service:"));
    assert!(result.contains("empty response"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_defaults() {
    assert_eq!(OrchestratorConfig::default().max_executions, 8);
    assert_eq!(SubAgentConfig::default().max_rounds, 4);

    let sandbox = SandboxConfig::default();
    assert_eq!(sandbox.runtime, "docker");
    assert_eq!(sandbox.image, "python:3.11-slim");
    assert_eq!(sandbox.limits.memory_mib, 256);
    assert_eq!(sandbox.limits.cpu_cores, 0.5);
    assert_eq!(sandbox.timeout, Duration::from_secs(30));
    assert_eq!(sandbox.mount_target, "/app/log.txt");

    let chat = ChatConfig::default();
    assert_eq!(chat.base_url, "http://localhost:11434");
    assert_eq!(chat.temperature, 0.0);
}

#[test]
fn test_tool_message_serialization() {
    let msg = ChatMessage::tool("call_1", "query_tool", "3 chunks");
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["role"], "tool");
    assert_eq!(json["tool_call_id"], "call_1");
    assert!(json.get("tool_calls").is_none());
}

// Integration tests that require external services

/// Full run against a real model and Docker
#[tokio::test]
#[ignore = "Requires Ollama with a tool-capable model and Docker"]
async fn test_end_to_end_with_ollama_and_docker() {
    use loglens::ollama::ChatClient;
    use loglens::sandbox::ContainerSandbox;
    use std::io::Write;

    let mut log = tempfile::NamedTempFile::new().unwrap();
    writeln!(log, "2024-01-01 10:00:00 [INFO] started").unwrap();
    writeln!(log, "2024-01-01 10:00:01 [ERROR] db timeout").unwrap();
    writeln!(log, "2024-01-01 10:00:02 [ERROR] db timeout").unwrap();

    let ctx = Arc::new(LogContext::new(log.path(), vec![]));
    let chat: Arc<dyn CompletionService> = Arc::new(ChatClient::new(ChatConfig::default()));
    let subagent = Arc::new(SubAgent::new(
        chat.clone(),
        Arc::new(ContainerSandbox::new(SandboxConfig::default())),
        SubAgentConfig::default(),
    ));
    let registry = ToolRegistry::builder()
        .register_with_hook(
            Arc::new(AnalyzerTool::new(subagent, ctx.clone())),
            Arc::new(AnalyzerArgumentRepair),
        )
        .build();
    let agent = Orchestrator::new(chat, Arc::new(registry), OrchestratorConfig::default());

    let mut conversation = Conversation::from_user(QUESTION);
    let outcome = agent.run(&mut conversation, ctx).await.unwrap();
    assert!(outcome.final_answer.contains('2'));
}
