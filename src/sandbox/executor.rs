//! Container-backed execution of untrusted code
//!
//! Every run starts a fresh, throwaway container:
//!
//! ```text
//! docker run --rm --name loglens-<uuid>
//!     --network none                       ← no network reachability
//!     --memory 256m --memory-swap 256m     ← hard memory ceiling
//!     --cpus 0.5 --pids-limit 64           ← fractional CPU, fork bomb guard
//!     --cap-drop ALL --security-opt no-new-privileges
//!     --read-only --tmpfs /tmp:rw,size=16m
//!     --mount type=bind,source=<host file>,target=/app/log.txt,readonly
//!     python:3.11-slim python -c <code>    ← code is one argv entry, no shell
//! ```
//!
//! The whole call is wrapped in a wall-clock timeout. On expiry the runtime
//! client is killed (it was spawned with `kill_on_drop`) and the named
//! container is force-removed in the background, so the caller gets its
//! result at the limit. Each output stream is capped at
//! `max_output_bytes`; the rest is drained and dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use super::config::SandboxConfig;
use crate::metrics::{SANDBOX_DURATION, SANDBOX_EXECUTIONS};

/// How long to wait for `<runtime> rm -f` after a timeout
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Classified result of one sandbox run
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxResult {
    /// The interpreter ran to completion (any exit code)
    Completed {
        stdout: String,
        stderr: String,
        exit_code: i32,
        duration_ms: f64,
    },
    /// The wall-clock limit expired and the process was killed
    TimedOut { limit: Duration },
    /// The runtime could not be started or its output collected
    LaunchFailed { reason: String },
    /// The file to mount does not exist or is not a regular file
    MissingFile { path: PathBuf },
}

impl SandboxResult {
    /// Exit code 0 is the only success
    pub fn is_success(&self) -> bool {
        matches!(self, SandboxResult::Completed { exit_code: 0, .. })
    }

    /// Metric / log label
    pub fn status(&self) -> &'static str {
        match self {
            SandboxResult::Completed { exit_code: 0, .. } => "success",
            SandboxResult::Completed { .. } => "error",
            SandboxResult::TimedOut { .. } => "timeout",
            SandboxResult::LaunchFailed { .. } => "launch_failed",
            SandboxResult::MissingFile { .. } => "missing_file",
        }
    }

    /// Stdout on success, otherwise stderr or a description of the cause
    pub fn content(&self) -> String {
        match self {
            SandboxResult::Completed {
                stdout,
                exit_code: 0,
                ..
            } => stdout.clone(),
            SandboxResult::Completed {
                stderr, exit_code, ..
            } => {
                if stderr.trim().is_empty() {
                    format!("process exited with code {} and no error output", exit_code)
                } else {
                    stderr.clone()
                }
            }
            SandboxResult::TimedOut { limit } => {
                format!("execution timed out after {:.1}s", limit.as_secs_f64())
            }
            SandboxResult::LaunchFailed { reason } => format!("sandbox launch failed: {}", reason),
            SandboxResult::MissingFile { path } => {
                format!("log file not found at {}", path.display())
            }
        }
    }
}

/// Runs one untrusted code string against one read-only file
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    /// Never fails outward; every problem is a failure-classified result.
    async fn execute(&self, code: &str, file_to_mount: &Path) -> SandboxResult;

    /// In-sandbox path where `file_to_mount` appears
    fn mount_target(&self) -> &str;
}

/// Production sandbox backed by a container runtime
#[derive(Debug, Clone)]
pub struct ContainerSandbox {
    config: SandboxConfig,
}

impl ContainerSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Full runtime argv for one run.
    ///
    /// Every constraint is unconditional; `code` is always the final entry.
    pub fn container_args(&self, name: &str, host_file: &Path, code: &str) -> Vec<String> {
        let limits = &self.config.limits;
        let memory = limits.memory_arg();
        let cpus = limits.cpus_arg();
        let pids = limits.pids.to_string();
        let mount = format!(
            "type=bind,source={},target={},readonly",
            host_file.display(),
            self.config.mount_target
        );

        let mut args: Vec<String> = vec![
            "run",
            "--rm",
            "--name",
            name,
            "--network",
            "none",
            "--memory",
            memory.as_str(),
            "--memory-swap",
            memory.as_str(),
            "--cpus",
            cpus.as_str(),
            "--pids-limit",
            pids.as_str(),
            "--cap-drop",
            "ALL",
            "--security-opt",
            "no-new-privileges",
            "--read-only",
            "--tmpfs",
            "/tmp:rw,size=16m",
            "--mount",
            mount.as_str(),
            self.config.image.as_str(),
        ]
        .into_iter()
        .map(String::from)
        .collect();

        args.extend(self.config.interpreter.iter().cloned());
        args.push(code.to_string());
        args
    }

}

/// Force-remove a container left behind by a timed-out run.
///
/// Runs detached from the caller; its own deadline bounds the task.
async fn remove_container(runtime: String, name: String) {
    let removal = Command::new(&runtime)
        .args(["rm", "-f", name.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match timeout(CLEANUP_TIMEOUT, removal).await {
        Ok(Ok(status)) if status.success() => debug!(container = %name, "Removed timed-out container"),
        Ok(Ok(status)) => warn!(container = %name, ?status, "Container removal exited non-zero"),
        Ok(Err(e)) => warn!(container = %name, error = %e, "Container removal failed"),
        Err(_) => warn!(container = %name, "Container removal timed out"),
    }
}

#[async_trait]
impl CodeSandbox for ContainerSandbox {
    async fn execute(&self, code: &str, file_to_mount: &Path) -> SandboxResult {
        let span = info_span!(
            "sandbox_exec",
            code_len = code.len(),
            file = %file_to_mount.display(),
            otel.name = "sandbox_exec"
        );

        async {
            let start = Instant::now();

            let result = match resolve_mount_source(file_to_mount).await {
                Ok(host_file) => {
                    let name = format!("loglens-{}", Uuid::now_v7().simple());
                    let args = self.container_args(&name, &host_file, code);
                    debug!(container = %name, runtime = %self.config.runtime, "Launching sandbox");

                    let result = run_process(
                        &self.config.runtime,
                        &args,
                        self.config.timeout,
                        self.config.max_output_bytes,
                    )
                    .await;
                    if matches!(result, SandboxResult::TimedOut { .. }) {
                        tokio::spawn(
                            remove_container(self.config.runtime.clone(), name)
                                .instrument(Span::current()),
                        );
                    }
                    result
                }
                Err(rejected) => rejected,
            };

            let elapsed = start.elapsed();
            SANDBOX_EXECUTIONS.with_label_values(&[result.status()]).inc();
            SANDBOX_DURATION.observe(elapsed.as_secs_f64());

            match &result {
                SandboxResult::Completed { exit_code, duration_ms, .. } => {
                    info!(exit_code, duration_ms, status = result.status(), "Sandbox run finished");
                }
                other => {
                    warn!(status = other.status(), cause = %other.content(), "Sandbox run failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    fn mount_target(&self) -> &str {
        &self.config.mount_target
    }
}

/// Canonicalize the host file and refuse anything that can't be bind-mounted
/// safely.
async fn resolve_mount_source(path: &Path) -> Result<PathBuf, SandboxResult> {
    let missing = || SandboxResult::MissingFile {
        path: path.to_path_buf(),
    };

    let canonical = tokio::fs::canonicalize(path).await.map_err(|_| missing())?;
    let metadata = tokio::fs::metadata(&canonical).await.map_err(|_| missing())?;
    if !metadata.is_file() {
        return Err(missing());
    }

    // ',' and newlines would split the --mount specification
    let text = canonical.to_string_lossy();
    if text.contains(',') || text.contains('\n') {
        return Err(SandboxResult::LaunchFailed {
            reason: format!("refusing to mount path with unsupported characters: {}", text),
        });
    }

    Ok(canonical)
}

/// Spawn `program args..`, capture at most `max_output` bytes of each stream,
/// and kill it if `limit` expires.
pub async fn run_process(
    program: &str,
    args: &[String],
    limit: Duration,
    max_output: usize,
) -> SandboxResult {
    let start = Instant::now();

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            return SandboxResult::LaunchFailed {
                reason: format!("failed to start {}: {}", program, e),
            }
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let collect = async {
        let (stdout, stderr) = tokio::try_join!(
            read_capped(stdout, max_output),
            read_capped(stderr, max_output)
        )?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((stdout, stderr, status))
    };

    // On timeout the child is dropped on return, which kills it.
    match timeout(limit, collect).await {
        Ok(Ok((stdout, stderr, status))) => SandboxResult::Completed {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        },
        Ok(Err(e)) => SandboxResult::LaunchFailed {
            reason: format!("failed to collect output of {}: {}", program, e),
        },
        Err(_) => SandboxResult::TimedOut { limit },
    }
}

/// Keep the first `max` bytes of a pipe and drain the rest so the writer
/// never blocks on a full pipe.
async fn read_capped<R>(pipe: Option<R>, max: usize) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(String::new());
    };

    let mut kept = Vec::new();
    let mut head = pipe.take(max as u64);
    head.read_to_end(&mut kept).await?;
    let mut rest = head.into_inner();
    let dropped = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await?;

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if dropped > 0 {
        text.push_str(&format!(
            "\n[output truncated: kept {} of {} bytes]",
            kept.len(),
            kept.len() as u64 + dropped
        ));
    }
    Ok(text)
}
