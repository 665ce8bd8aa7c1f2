//! Sandbox configuration: resource ceilings and container settings
//!
//! # CPU Quota Explained
//!
//! The container runtime turns `--cpus` into a CFS quota:
//! - "1.0" = one full core
//! - "0.5" = half a core (50ms of every 100ms period)
//!
//! Memory is a hard ceiling; swap is pinned to the same value so the process
//! is OOM-killed instead of paging.

use std::time::Duration;

/// Fixed in-sandbox path of the mounted log file
pub const DEFAULT_MOUNT_TARGET: &str = "/app/log.txt";

/// Per-stream capture ceiling; anything past it is read and discarded
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Resource ceilings applied to every sandbox run
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    /// Number of CPU cores (fractional, e.g., 0.5 for half a core)
    pub cpu_cores: f64,
    /// Memory ceiling in MiB
    pub memory_mib: u64,
    /// Maximum number of processes inside the sandbox
    pub pids: u32,
}

impl ResourceLimits {
    /// Half a core, 256 MiB: enough for pandas-free log crunching
    pub fn small() -> Self {
        Self {
            cpu_cores: 0.5,
            memory_mib: 256,
            pids: 64,
        }
    }

    /// One core, 1 GiB for larger log files
    pub fn medium() -> Self {
        Self {
            cpu_cores: 1.0,
            memory_mib: 1024,
            pids: 128,
        }
    }

    pub fn custom(cpu_cores: f64, memory_mib: u64) -> Self {
        Self {
            cpu_cores,
            memory_mib,
            ..Self::small()
        }
    }

    /// Value for `--cpus`
    pub fn cpus_arg(&self) -> String {
        format!("{}", self.cpu_cores)
    }

    /// Value for `--memory` / `--memory-swap`
    pub fn memory_arg(&self) -> String {
        format!("{}m", self.memory_mib)
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::small()
    }
}

/// Settings for [`ContainerSandbox`](super::ContainerSandbox)
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Container runtime binary ("docker" or "podman")
    pub runtime: String,
    /// Image providing the interpreter
    pub image: String,
    pub limits: ResourceLimits,
    /// Wall-clock timeout for the whole run, including container start
    pub timeout: Duration,
    /// Where the host file appears inside the sandbox
    pub mount_target: String,
    /// Interpreter argv; the code is appended as one extra argument
    pub interpreter: Vec<String>,
    /// Bytes kept from each of stdout and stderr
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "python:3.11-slim".to_string(),
            limits: ResourceLimits::default(),
            timeout: Duration::from_secs(30),
            mount_target: DEFAULT_MOUNT_TARGET.to_string(),
            interpreter: vec!["python".to_string(), "-c".to_string()],
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let config = SandboxConfig::default();
        assert_eq!(config.limits.memory_arg(), "256m");
        assert_eq!(config.limits.cpus_arg(), "0.5");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.mount_target, "/app/log.txt");
        assert_eq!(config.max_output_bytes, 64 * 1024);
    }

    #[test]
    fn test_custom_limits_keep_pid_ceiling() {
        let limits = ResourceLimits::custom(2.0, 512);
        assert_eq!(limits.cpus_arg(), "2");
        assert_eq!(limits.memory_arg(), "512m");
        assert_eq!(limits.pids, ResourceLimits::small().pids);
    }
}
