//! Sandboxed code execution
//!
//! The trust boundary of the system. Model-generated code runs in a fresh
//! container per call with no network, capped memory and CPU, a wall-clock
//! timeout and exactly one read-only file mounted at a fixed path.
//!
//! # Example Usage
//!
//! ```ignore
//! use loglens::sandbox::{CodeSandbox, ContainerSandbox, SandboxConfig};
//!
//! let sandbox = ContainerSandbox::new(SandboxConfig::default());
//! let result = sandbox.execute("print(len(open('/app/log.txt').readlines()))", path).await;
//! println!("{} -> {}", result.status(), result.content());
//! ```

pub mod config;
pub mod executor;

pub use config::{ResourceLimits, SandboxConfig, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_MOUNT_TARGET};
pub use executor::{run_process, CodeSandbox, ContainerSandbox, SandboxResult};
