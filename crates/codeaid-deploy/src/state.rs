//! Append-only operation log of a deployment run.

use chrono::{DateTime, Utc};
use codeaid_core::CommandOutput;
use serde::{Deserialize, Serialize};

use crate::stage::DeployStage;

/// One step recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationEntry {
    pub seq: u64,
    pub stage: DeployStage,
    /// Rendered command line, for command steps.
    pub command: Option<String>,
    /// Captured output or note text, already truncated.
    pub output: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub at: DateTime<Utc>,
}

impl OperationEntry {
    /// Human-readable lines for the report.
    pub fn lines(&self) -> Vec<String> {
        match &self.command {
            Some(command) => {
                let mut lines = vec![
                    format!("Executing command: {}", command),
                    format!("Output:\n{}", self.output),
                ];
                if !self.success {
                    match self.exit_code {
                        Some(code) => lines.push(format!(
                            "Error: Command '{}' exited with status {}",
                            command, code
                        )),
                        None => lines.push(format!("Error: Command '{}' did not complete", command)),
                    }
                }
                lines
            }
            None => vec![self.output.clone()],
        }
    }
}

/// Ordered log of every step plus the final outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    entries: Vec<OperationEntry>,
    outcome: Option<bool>,
    #[serde(skip)]
    output_cap: usize,
}

impl DeploymentState {
    pub fn new(output_cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            outcome: None,
            output_cap,
        }
    }

    pub fn entries(&self) -> &[OperationEntry] {
        &self.entries
    }

    pub fn outcome(&self) -> Option<bool> {
        self.outcome
    }

    /// Set the final outcome. Later calls are ignored.
    pub fn finish(&mut self, success: bool) {
        if self.outcome.is_none() {
            self.outcome = Some(success);
        }
    }

    fn push(
        &mut self,
        stage: DeployStage,
        command: Option<String>,
        output: &str,
        exit_code: Option<i32>,
        success: bool,
    ) {
        let seq = self.entries.len() as u64 + 1;
        self.entries.push(OperationEntry {
            seq,
            stage,
            command,
            output: truncate(output, self.output_cap),
            exit_code,
            success,
            at: Utc::now(),
        });
    }

    /// Record a finished command.
    pub fn record_command(&mut self, stage: DeployStage, output: &CommandOutput) {
        self.push(
            stage,
            Some(output.command.clone()),
            &output.combined(),
            output.exit_code,
            output.success(),
        );
    }

    /// Record a command that could not run to completion (timeout, missing binary).
    pub fn record_command_error(
        &mut self,
        stage: DeployStage,
        command: &str,
        error: &dyn std::fmt::Display,
    ) {
        self.push(
            stage,
            Some(command.to_string()),
            &error.to_string(),
            None,
            false,
        );
    }

    /// Record a free-form note.
    pub fn note(&mut self, stage: DeployStage, text: impl AsRef<str>, success: bool) {
        self.push(stage, None, text.as_ref(), None, success);
    }

    pub fn has_stage(&self, stage: DeployStage) -> bool {
        self.entries.iter().any(|e| e.stage == stage)
    }

    /// Every entry rendered as report lines, in order.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .flat_map(|e| e.lines())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Keep at most `cap` characters of `text`, marking the cut.
pub fn truncate(text: &str, cap: usize) -> String {
    let total = text.chars().count();
    if cap == 0 || total <= cap {
        return text.to_string();
    }
    let kept: String = text.chars().take(cap).collect();
    format!("{}\n... [truncated {} chars]", kept, total - cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(command: &str, code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            command: command.to_string(),
            exit_code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        let cut = truncate("abcdefghij", 4);
        assert!(cut.starts_with("abcd\n"));
        assert!(cut.contains("truncated 6 chars"));
        assert_eq!(truncate("ééééé", 2).chars().take(2).collect::<String>(), "éé");
    }

    #[test]
    fn test_failed_command_renders_error_line() {
        let mut state = DeploymentState::new(2000);
        state.record_command(
            DeployStage::Build,
            &output("docker build -t svc:latest -f Dockerfile .", 1, "", "no such file"),
        );
        let rendered = state.render();
        assert!(rendered.contains("Executing command: docker build -t svc:latest"));
        assert!(rendered.contains("Output:\nno such file"));
        assert!(rendered.contains("exited with status 1"));
        assert!(state.has_stage(DeployStage::Build));
        assert!(!state.has_stage(DeployStage::Apply));
    }

    #[test]
    fn test_entries_are_sequenced_and_truncated() {
        let mut state = DeploymentState::new(5);
        state.note(DeployStage::Materialize, "wrote files", true);
        state.record_command(DeployStage::Push, &output("docker push x", 0, "0123456789", ""));
        let entries = state.entries();
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[1].seq, 2);
        assert!(entries[1].output.starts_with("01234\n"));
    }

    #[test]
    fn test_outcome_is_set_once() {
        let mut state = DeploymentState::new(10);
        state.finish(false);
        state.finish(true);
        assert_eq!(state.outcome(), Some(false));
    }
}
