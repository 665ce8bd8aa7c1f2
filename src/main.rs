//! `loglens` - ask questions about a log file
//!
//! ```text
//! loglens --log-file app.log "How many ERROR lines were logged on 2024-03-01?"
//! loglens --log-file app.log            # interactive, one question per line
//! ```

use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use loglens::agent::{
    Conversation, LogContext, Orchestrator, OrchestratorConfig, Session, SessionStore, SubAgent,
    SubAgentConfig,
};
use loglens::metrics::encode_metrics;
use loglens::ollama::{ChatClient, ChatConfig, CompletionService};
use loglens::sandbox::{ContainerSandbox, ResourceLimits, SandboxConfig};
use loglens::tools::{
    AnalyzerArgumentRepair, AnalyzerTool, LineScanSearch, SemanticSearchTool, ToolRegistry,
};

type BoxError = Box<dyn Error + Send + Sync>;

/// Answer questions about a log file with a tool-using LLM agent.
#[derive(Parser, Debug)]
#[command(name = "loglens", version, about)]
struct Cli {
    /// Log file to analyze.
    #[arg(long, env = "LOGLENS_LOG_FILE")]
    log_file: PathBuf,

    /// File of representative log statements, one per line.
    /// Defaults to the first non-empty lines of the log.
    #[arg(long, env = "LOGLENS_CONTEXT_FILE")]
    context_file: Option<PathBuf>,

    /// How many log lines to sample when no context file is given.
    #[arg(long, default_value_t = 20)]
    sample_lines: usize,

    /// Ollama server URL.
    #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Model for the orchestrator.
    #[arg(long, env = "LOGLENS_MODEL", default_value = "qwen3")]
    model: String,

    /// Model for the code-writing sub-agent (defaults to --model).
    #[arg(long, env = "LOGLENS_ANALYZER_MODEL")]
    analyzer_model: Option<String>,

    /// Maximum orchestrator steps per question.
    #[arg(long, default_value_t = 8)]
    max_executions: usize,

    /// Maximum sub-agent rounds per delegated analysis.
    #[arg(long, default_value_t = 4)]
    sub_agent_rounds: usize,

    /// Container image providing the Python interpreter.
    #[arg(long, env = "LOGLENS_IMAGE", default_value = "python:3.11-slim")]
    image: String,

    /// Container runtime binary (docker or podman).
    #[arg(long, env = "LOGLENS_RUNTIME", default_value = "docker")]
    runtime: String,

    /// Sandbox memory limit in MiB.
    #[arg(long, default_value_t = 256)]
    memory_mib: u64,

    /// Sandbox CPU limit (fractional cores).
    #[arg(long, default_value_t = 0.5)]
    cpus: f64,

    /// Sandbox wall-clock timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Bytes of sandbox stdout / stderr kept per run.
    #[arg(long, default_value_t = loglens::sandbox::DEFAULT_MAX_OUTPUT_BYTES)]
    max_output_bytes: usize,

    /// Write a JSON transcript of the session to this directory.
    #[arg(long, env = "LOGLENS_TRANSCRIPT_DIR")]
    transcript_dir: Option<PathBuf>,

    /// Export spans to this OTLP collector (e.g. http://localhost:4317).
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Print Prometheus metrics before exiting.
    #[arg(long)]
    print_metrics: bool,

    /// Question to answer. Without it, questions are read from stdin.
    question: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    loglens::tracing::init_tracing("loglens", cli.otlp_endpoint.as_deref(), cli.log_json)?;

    let result = run(&cli).await;

    if cli.print_metrics {
        println!("{}", encode_metrics());
    }
    loglens::tracing::shutdown_tracing();
    result
}

async fn run(cli: &Cli) -> Result<(), BoxError> {
    let context = Arc::new(load_log_context(cli).await?);
    info!(
        log_file = %context.log_file_path.display(),
        samples = context.sample_lines.len(),
        "Loaded log context"
    );

    let orchestrator = build_orchestrator(cli, context.clone());
    let store = match &cli.transcript_dir {
        Some(dir) => Some(SessionStore::new(dir)?),
        None => None,
    };
    let mut session = Session::new(&context.log_file_path, &cli.model);
    let mut conversation = Conversation::new();

    if let Some(question) = &cli.question {
        let answer = ask(&orchestrator, &mut conversation, question, &context, &mut session, store.as_ref()).await?;
        println!("{}", answer);
        return Ok(());
    }

    println!("Ask about {} (type 'exit' to quit).", context.log_file_path.display());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_ascii_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        match ask(&orchestrator, &mut conversation, question, &context, &mut session, store.as_ref()).await {
            Ok(answer) => println!("\n{}\n", answer),
            // the session survives a failed turn; the next question starts a fresh run
            Err(e) => {
                error!(error = %e, "Question failed");
                println!("\nError: {}\n", e);
            }
        }
    }
    Ok(())
}

/// One turn: append the question, run the orchestrator, save the transcript.
async fn ask(
    orchestrator: &Orchestrator,
    conversation: &mut Conversation,
    question: &str,
    context: &Arc<LogContext>,
    session: &mut Session,
    store: Option<&SessionStore>,
) -> Result<String, BoxError> {
    conversation.push(loglens::ollama::ChatMessage::user(question));
    let outcome = orchestrator.run(conversation, context.clone()).await?;
    info!(
        trace_id = %outcome.trace_id,
        steps = outcome.steps,
        tool_calls = outcome.tool_calls,
        completion = outcome.completion.as_str(),
        "Answered"
    );

    session.record_turn(question, conversation, &outcome);
    if let Some(store) = store {
        match store.save(session) {
            Ok(path) => info!(path = %path.display(), "Transcript saved"),
            Err(e) => warn!(error = %e, "Failed to save transcript"),
        }
    }
    Ok(outcome.final_answer)
}

fn build_orchestrator(cli: &Cli, context: Arc<LogContext>) -> Orchestrator {
    let chat = |model: &str| -> Arc<dyn CompletionService> {
        Arc::new(ChatClient::new(ChatConfig {
            base_url: cli.ollama_url.clone(),
            model: model.to_string(),
            ..ChatConfig::default()
        }))
    };

    let sandbox = Arc::new(ContainerSandbox::new(SandboxConfig {
        runtime: cli.runtime.clone(),
        image: cli.image.clone(),
        limits: ResourceLimits::custom(cli.cpus, cli.memory_mib),
        timeout: Duration::from_secs(cli.timeout_secs),
        max_output_bytes: cli.max_output_bytes,
        ..SandboxConfig::default()
    }));

    let subagent = Arc::new(SubAgent::new(
        chat(cli.analyzer_model.as_deref().unwrap_or(&cli.model)),
        sandbox,
        SubAgentConfig {
            max_rounds: cli.sub_agent_rounds,
        },
    ));

    let registry = ToolRegistry::builder()
        .register(Arc::new(SemanticSearchTool::new(Arc::new(LineScanSearch::new(
            &context.log_file_path,
        )))))
        .register_with_hook(
            Arc::new(AnalyzerTool::new(subagent, context)),
            Arc::new(AnalyzerArgumentRepair),
        )
        .build();

    Orchestrator::new(
        chat(&cli.model),
        Arc::new(registry),
        OrchestratorConfig {
            max_executions: cli.max_executions,
        },
    )
}

/// Representative lines from `--context-file`, else a sample of the log itself
async fn load_log_context(cli: &Cli) -> Result<LogContext, BoxError> {
    let log_file = tokio::fs::canonicalize(&cli.log_file)
        .await
        .map_err(|e| format!("cannot open log file {}: {}", cli.log_file.display(), e))?;

    let source: &Path = cli.context_file.as_deref().unwrap_or(&log_file);
    let text = tokio::fs::read_to_string(source)
        .await
        .map_err(|e| format!("cannot read {}: {}", source.display(), e))?;

    let lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let sample_lines: Vec<String> = if cli.context_file.is_some() {
        lines.map(str::to_string).collect()
    } else {
        lines.take(cli.sample_lines).map(str::to_string).collect()
    };

    Ok(LogContext::new(log_file, sample_lines))
}
