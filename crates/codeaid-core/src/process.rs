//! Scoped subprocess execution.
//!
//! Every external command (docker, kubectl) goes through a [`CommandExecutor`]
//! with a mandatory timeout. The real executor spawns with `kill_on_drop`, so
//! a timed-out or cancelled command never outlives its call.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::domain::{CodeAidError, Result};
use crate::guard::bounded;

/// A command to run, first element of `argv` being the executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I, timeout_secs: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            working_dir: None,
            timeout_secs,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// Shell-like rendering for logs and reports.
    pub fn display(&self) -> String {
        self.argv
            .iter()
            .map(|arg| {
                if arg.is_empty() || arg.contains(char::is_whitespace) {
                    format!("'{}'", arg.replace('\'', "'\\''"))
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Rendered command line.
    pub command: String,

    /// Exit code; `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, skipping empty streams.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (true, true) => String::new(),
        }
    }
}

/// Backend that runs [`CommandSpec`]s.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `spec` to completion, honouring its timeout and `cancel`.
    ///
    /// A non-zero exit is an `Ok` output; timeouts, cancellation and spawn
    /// failures are errors.
    async fn execute(&self, spec: &CommandSpec, cancel: &CancellationToken)
        -> Result<CommandOutput>;
}

/// Executor backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        if spec.argv.is_empty() {
            return Err(CodeAidError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            )));
        }

        let start = Instant::now();
        let mut command = Command::new(&spec.argv[0]);
        command
            .args(&spec.argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn()?;
        let rendered = spec.display();
        tracing::debug!(command = %rendered, timeout_secs = spec.timeout_secs, "Spawned command");

        let output = bounded(
            spec.program(),
            Duration::from_secs(spec.timeout_secs),
            cancel,
            async move { child.wait_with_output().await.map_err(CodeAidError::from) },
        )
        .await?;

        Ok(CommandOutput {
            command: rendered,
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_arguments_with_spaces() {
        let spec = CommandSpec::new(["sh", "-c", "javac A.java && java A"], 10);
        assert_eq!(spec.display(), "sh -c 'javac A.java && java A'");
        assert_eq!(spec.program(), "sh");
    }

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            command: "x".into(),
            exit_code: Some(1),
            stdout: "step 1\n".into(),
            stderr: "failed\n".into(),
            duration_ms: 1,
        };
        assert_eq!(out.combined(), "step 1\nfailed");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let spec = CommandSpec::new(["echo", "hello"], 10);
        let out = ProcessExecutor::new()
            .execute(&spec, &CancellationToken::new())
            .await
            .expect("execute failed");
        assert!(out.success());
        assert!(out.stdout.contains("hello"));
        assert_eq!(out.command, "echo hello");
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let spec = CommandSpec::new(["false"], 10);
        let out = ProcessExecutor::new()
            .execute(&spec, &CancellationToken::new())
            .await
            .expect("execute failed");
        assert!(!out.success());
        assert_ne!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let spec = CommandSpec::new(["sleep", "5"], 1);
        let result = ProcessExecutor::new()
            .execute(&spec, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(CodeAidError::Timeout { limit_secs: 1, .. })));
    }

    #[tokio::test]
    async fn test_execute_missing_binary_is_io_error() {
        let spec = CommandSpec::new(["codeaid-definitely-not-installed"], 5);
        let result = ProcessExecutor::new()
            .execute(&spec, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(CodeAidError::Io(_))));
    }
}
