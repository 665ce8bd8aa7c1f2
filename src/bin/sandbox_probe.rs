//! Run one code snippet in the sandbox against a file and print the result.
//!
//! Useful for checking that the container runtime, image and limits work
//! before pointing the agent at them.
//!
//! ```text
//! sandbox_probe --file app.log "print(sum(1 for _ in open('/app/log.txt')))"
//! sandbox_probe --file app.log --timeout-secs 5 "while True: pass"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use loglens::sandbox::{CodeSandbox, ContainerSandbox, ResourceLimits, SandboxConfig};

/// Execute Python code in the loglens sandbox.
#[derive(Parser, Debug)]
#[command(name = "sandbox_probe", version, about)]
struct Args {
    /// File mounted read-only inside the sandbox.
    #[arg(long)]
    file: PathBuf,

    /// Container runtime binary.
    #[arg(long, default_value = "docker")]
    runtime: String,

    /// Container image.
    #[arg(long, default_value = "python:3.11-slim")]
    image: String,

    #[arg(long, default_value_t = 256)]
    memory_mib: u64,

    #[arg(long, default_value_t = 0.5)]
    cpus: f64,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Print the runtime argv instead of running it.
    #[arg(long)]
    dry_run: bool,

    /// Python source to run.
    code: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    loglens::tracing::init_tracing("sandbox_probe", None, false)?;

    let sandbox = ContainerSandbox::new(SandboxConfig {
        runtime: args.runtime,
        image: args.image,
        limits: ResourceLimits::custom(args.cpus, args.memory_mib),
        timeout: Duration::from_secs(args.timeout_secs),
        ..SandboxConfig::default()
    });

    if args.dry_run {
        let argv = sandbox.container_args("loglens-dry-run", &args.file, &args.code);
        println!("{} {:?}", sandbox.config().runtime, argv);
        return Ok(());
    }

    let result = sandbox.execute(&args.code, &args.file).await;
    println!("[PROBE] status: {}", result.status());
    println!("─────────────────────────────────────────");
    println!("{}", result.content());
    println!("─────────────────────────────────────────");

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
