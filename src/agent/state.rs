//! Per-run execution state and the read-only log context

use std::path::PathBuf;
use std::sync::Arc;

/// Fixed facts about the log being analyzed, shared by every loop of a session
#[derive(Debug, Clone, PartialEq)]
pub struct LogContext {
    /// Host path of the full log file
    pub log_file_path: PathBuf,
    /// Representative log lines shown to the model as structure hints
    pub sample_lines: Vec<String>,
}

impl LogContext {
    pub fn new(log_file_path: impl Into<PathBuf>, sample_lines: Vec<String>) -> Self {
        Self {
            log_file_path: log_file_path.into(),
            sample_lines,
        }
    }

    /// Sample lines as a newline-separated block for prompts
    pub fn sample_block(&self) -> String {
        if self.sample_lines.is_empty() {
            "(no representative lines available)".to_string()
        } else {
            self.sample_lines.join("\n")
        }
    }
}

/// Step counter for one orchestrator run.
///
/// `execution_count` only moves forward, one per THINK step, and never passes
/// `max_executions`.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    execution_count: usize,
    max_executions: usize,
    context: Arc<LogContext>,
}

impl ExecutionState {
    pub fn new(max_executions: usize, context: Arc<LogContext>) -> Self {
        Self {
            execution_count: 0,
            max_executions,
            context,
        }
    }

    pub fn execution_count(&self) -> usize {
        self.execution_count
    }

    pub fn max_executions(&self) -> usize {
        self.max_executions
    }

    pub fn context(&self) -> &LogContext {
        &self.context
    }

    pub fn is_exhausted(&self) -> bool {
        self.execution_count >= self.max_executions
    }

    /// Record one THINK step. Returns false (and does nothing) at the cap.
    pub fn advance(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.execution_count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(max: usize) -> ExecutionState {
        ExecutionState::new(max, Arc::new(LogContext::new("/tmp/app.log", vec![])))
    }

    #[test]
    fn test_advance_stops_at_cap() {
        let mut s = state(2);
        assert!(s.advance());
        assert!(s.advance());
        assert!(s.is_exhausted());
        assert!(!s.advance());
        assert_eq!(s.execution_count(), 2);
    }

    #[test]
    fn test_zero_cap_is_exhausted_immediately() {
        assert!(state(0).is_exhausted());
    }

    #[test]
    fn test_sample_block_placeholder() {
        let ctx = LogContext::new("/tmp/app.log", vec![]);
        assert!(ctx.sample_block().contains("no representative lines"));
        let ctx = LogContext::new("/tmp/app.log", vec!["a".into(), "b".into()]);
        assert_eq!(ctx.sample_block(), "a\nb");
    }
}
