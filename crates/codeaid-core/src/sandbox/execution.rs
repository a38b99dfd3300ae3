//! Ephemeral, isolated execution of one artifact.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::config::SandboxConfig;
use super::runtime::{ContainerRun, ContainerRuntime};
use crate::domain::{Artifact, CodeAidError, ExecutionResult, Language, Result};

/// Runs artifacts inside throwaway containers.
///
/// Each call gets its own scratch directory, removed when the call returns on
/// any path.
pub struct ExecutionSandbox {
    runtime: Arc<dyn ContainerRuntime>,
    config: SandboxConfig,
}

impl ExecutionSandbox {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Self {
        Self { runtime, config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Execute `artifact` once.
    ///
    /// A non-zero exit or a timeout is a failed [`ExecutionResult`]; `Err` is
    /// reserved for cancellation and an unusable runtime.
    pub async fn run(
        &self,
        artifact: &Artifact,
        run_id: &str,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let command = match run_command(artifact) {
            Some(command) => command,
            None => {
                tracing::warn!(run_id = %run_id, attempt, language = %artifact.language, "Refusing to run artifact");
                return Ok(ExecutionResult::refused(format!(
                    "no runner for language '{}'",
                    artifact.language
                )));
            }
        };

        std::fs::create_dir_all(&self.config.work_root)?;
        let scratch = tempfile::Builder::new()
            .prefix("codeaid-")
            .tempdir_in(&self.config.work_root)?;
        let mount = std::fs::canonicalize(scratch.path())?;
        std::fs::write(mount.join(artifact.file_name()), &artifact.code)?;

        let run = ContainerRun {
            name: container_name(run_id, attempt),
            image: artifact.image_reference(),
            mount,
            command,
            memory: self.config.memory.clone(),
            cpus: self.config.cpus,
            network: self.config.network.clone(),
            timeout_secs: self.config.timeout_secs,
        };

        tracing::info!(
            run_id = %run_id,
            attempt,
            container = %run.name,
            image = %run.image,
            "Running artifact"
        );
        let start = Instant::now();
        let result = match self.runtime.run(&run, cancel).await {
            Ok(output) => {
                let duration_ms = output.duration_ms;
                match output.exit_code {
                    Some(code) => {
                        ExecutionResult::completed(code, output.stdout, output.stderr, duration_ms)
                    }
                    None => ExecutionResult::signalled(output.stderr, duration_ms),
                }
            }
            Err(CodeAidError::Timeout { limit_secs, .. }) => {
                self.discard_container(&run.name).await;
                ExecutionResult::timed_out(limit_secs, start.elapsed().as_millis() as u64)
            }
            Err(err @ CodeAidError::Cancelled { .. }) => {
                self.discard_container(&run.name).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            run_id = %run_id,
            attempt,
            exit_code = ?result.exit_code,
            timed_out = result.timed_out,
            duration_ms = result.duration_ms,
            "Artifact finished"
        );
        Ok(result)
    }

    // The caller's token may already be cancelled, so cleanup runs on its own.
    async fn discard_container(&self, name: &str) {
        if let Err(e) = self
            .runtime
            .remove_container(name, &CancellationToken::new())
            .await
        {
            tracing::warn!(container = %name, error = %e, "Failed to remove container");
        }
    }
}

/// Name of the container for one attempt of one run.
pub fn container_name(run_id: &str, attempt: u32) -> String {
    format!("codeaid-{}-{}", run_id, attempt)
}

/// Command that runs `artifact` from `/workspace`, or `None` when the language has no runner.
pub fn run_command(artifact: &Artifact) -> Option<Vec<String>> {
    match artifact.language {
        Language::Python => Some(vec![
            "python".to_string(),
            format!("/workspace/{}", artifact.file_name()),
        ]),
        Language::Java => Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "javac /workspace/{} && java -cp /workspace {}",
                artifact.file_name(),
                artifact.entry
            ),
        ]),
        Language::Unknown => None,
    }
}
