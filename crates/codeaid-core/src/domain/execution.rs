//! Outcome of running one artifact.

use serde::{Deserialize, Serialize};

/// Captured result of one sandboxed execution.
///
/// `output` holds stdout when the run succeeded and stderr when it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,

    /// Process exit code; `None` when the run never produced one (timeout, refused).
    pub exit_code: Option<i32>,

    pub timed_out: bool,

    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn completed(exit_code: i32, stdout: String, stderr: String, duration_ms: u64) -> Self {
        let output = if exit_code == 0 { stdout } else { stderr };
        Self {
            output,
            exit_code: Some(exit_code),
            timed_out: false,
            duration_ms,
        }
    }

    pub fn timed_out(limit_secs: u64, duration_ms: u64) -> Self {
        Self {
            output: format!("execution timed out after {}s", limit_secs),
            exit_code: None,
            timed_out: true,
            duration_ms,
        }
    }

    /// Process ended without an exit code (killed by a signal).
    pub fn signalled(stderr: String, duration_ms: u64) -> Self {
        Self {
            output: stderr,
            exit_code: None,
            timed_out: false,
            duration_ms,
        }
    }

    /// A failure that happened before any container was started.
    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            output: reason.into(),
            exit_code: None,
            timed_out: false,
            duration_ms: 0,
        }
    }

    /// Whether this run passed (exit code 0).
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}
