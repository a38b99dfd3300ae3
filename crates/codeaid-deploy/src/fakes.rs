//! In-memory orchestrator for tests and dry runs.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use codeaid_core::{CodeAidError, CommandOutput, Result};
use tokio_util::sync::CancellationToken;

use crate::orchestrator::{Orchestrator, WorkloadStatus};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn output(command: String, exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        command,
        exit_code: Some(exit_code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        duration_ms: 1,
    }
}

/// Control plane that replays scripted listings.
///
/// Listings are consumed in order; once exhausted every poll sees nothing.
#[derive(Debug, Default)]
pub struct FakeOrchestrator {
    listings: Mutex<VecDeque<std::result::Result<Vec<WorkloadStatus>, String>>>,
    applied: Mutex<Vec<PathBuf>>,
    applied_manifests: Mutex<Vec<String>>,
    logged: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
    fail_apply: Option<String>,
    fail_logs: Option<String>,
    log_output: String,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_apply(mut self, stderr: &str) -> Self {
        self.fail_apply = Some(stderr.to_string());
        self
    }

    pub fn failing_logs(mut self, stderr: &str) -> Self {
        self.fail_logs = Some(stderr.to_string());
        self
    }

    pub fn with_log_output(mut self, stdout: &str) -> Self {
        self.log_output = stdout.to_string();
        self
    }

    pub fn script_listing(&self, workloads: Vec<WorkloadStatus>) {
        lock(&self.listings).push_back(Ok(workloads));
    }

    pub fn script_listing_error(&self, message: &str) {
        lock(&self.listings).push_back(Err(message.to_string()));
    }

    pub fn applied(&self) -> Vec<PathBuf> {
        lock(&self.applied).clone()
    }

    /// Manifest contents as read at apply time.
    pub fn applied_manifests(&self) -> Vec<String> {
        lock(&self.applied_manifests).clone()
    }

    pub fn logged(&self) -> Vec<String> {
        lock(&self.logged).clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn apply(&self, manifest: &Path, _cancel: &CancellationToken) -> Result<CommandOutput> {
        lock(&self.applied).push(manifest.to_path_buf());
        if let Ok(contents) = std::fs::read_to_string(manifest) {
            lock(&self.applied_manifests).push(contents);
        }
        let command = format!("kubectl apply -f {}", manifest.display());
        Ok(match &self.fail_apply {
            Some(stderr) => output(command, 1, "", stderr),
            None => output(command, 0, "deployment.apps/configured\n", ""),
        })
    }

    async fn list_workloads(
        &self,
        name_substring: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<WorkloadStatus>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.listings).pop_front() {
            Some(Ok(workloads)) => Ok(workloads
                .into_iter()
                .filter(|w| w.name.contains(name_substring))
                .collect()),
            Some(Err(message)) => Err(CodeAidError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                message,
            ))),
            None => Ok(Vec::new()),
        }
    }

    async fn logs(&self, workload: &str, _cancel: &CancellationToken) -> Result<CommandOutput> {
        lock(&self.logged).push(workload.to_string());
        let command = format!("kubectl logs {}", workload);
        Ok(match &self.fail_logs {
            Some(stderr) => output(command, 1, "", stderr),
            None => output(command, 0, &self.log_output, ""),
        })
    }
}
