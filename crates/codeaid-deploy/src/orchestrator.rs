//! Orchestration control plane capability and its kubectl backend.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use codeaid_core::{
    CodeAidError, CommandExecutor, CommandOutput, CommandSpec, ProcessExecutor, Result,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Statuses outside the named phases after which a pod never progresses.
const TERMINAL_STATUSES: &[&str] = &[
    "OOMKilled",
    "Evicted",
    "ContainerCannotRun",
    "CreateContainerError",
    "CreateContainerConfigError",
    "InvalidImageName",
    "DeadlineExceeded",
    "StartError",
    "Init:Error",
    "Init:CrashLoopBackOff",
];

/// Coarse workload phase as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadPhase {
    Running,
    Completed,
    Pending,
    CrashLoopBackOff,
    Failed,
    Other(String),
}

impl WorkloadPhase {
    pub fn parse(status: &str) -> Self {
        match status.trim() {
            "Running" => WorkloadPhase::Running,
            "Completed" | "Succeeded" => WorkloadPhase::Completed,
            "Pending" | "ContainerCreating" | "PodInitializing" => WorkloadPhase::Pending,
            "CrashLoopBackOff" => WorkloadPhase::CrashLoopBackOff,
            "Error" | "Failed" => WorkloadPhase::Failed,
            other => WorkloadPhase::Other(other.to_string()),
        }
    }

    /// Running or ran to completion.
    pub fn is_healthy(&self) -> bool {
        matches!(self, WorkloadPhase::Running | WorkloadPhase::Completed)
    }

    /// Past scheduling and image pull: the container ran, or reached a state
    /// it will not leave on its own. `Pending`, `ImagePullBackOff` and other
    /// waiting statuses are not started.
    pub fn is_started(&self) -> bool {
        match self {
            WorkloadPhase::Pending => false,
            WorkloadPhase::Other(status) => TERMINAL_STATUSES.contains(&status.as_str()),
            _ => true,
        }
    }
}

impl fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadPhase::Running => f.write_str("Running"),
            WorkloadPhase::Completed => f.write_str("Completed"),
            WorkloadPhase::Pending => f.write_str("Pending"),
            WorkloadPhase::CrashLoopBackOff => f.write_str("CrashLoopBackOff"),
            WorkloadPhase::Failed => f.write_str("Failed"),
            WorkloadPhase::Other(s) => f.write_str(s),
        }
    }
}

/// One workload from a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub name: String,
    pub phase: WorkloadPhase,
}

/// Parse `kubectl get pods --no-headers` output.
///
/// Columns are `NAME READY STATUS RESTARTS AGE`; lines with fewer than three
/// columns are skipped.
pub fn parse_pod_listing(stdout: &str) -> Vec<WorkloadStatus> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let name = cols.next()?;
            let _ready = cols.next()?;
            let status = cols.next()?;
            Some(WorkloadStatus {
                name: name.to_string(),
                phase: WorkloadPhase::parse(status),
            })
        })
        .collect()
}

/// What the deployment pipeline needs from the control plane.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Apply a manifest file. Non-zero exit comes back as output, not `Err`.
    async fn apply(&self, manifest: &Path, cancel: &CancellationToken) -> Result<CommandOutput>;

    /// Workloads whose name contains `name_substring`.
    async fn list_workloads(
        &self,
        name_substring: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkloadStatus>>;

    async fn logs(&self, workload: &str, cancel: &CancellationToken) -> Result<CommandOutput>;
}

/// kubectl driven through a [`CommandExecutor`].
pub struct Kubectl<E: CommandExecutor = ProcessExecutor> {
    bin: String,
    namespace: Option<String>,
    executor: E,
    timeout_secs: u64,
}

impl Kubectl<ProcessExecutor> {
    pub fn new(bin: impl Into<String>, namespace: Option<String>, timeout_secs: u64) -> Self {
        Self::with_executor(bin, namespace, ProcessExecutor::new(), timeout_secs)
    }
}

impl<E: CommandExecutor> Kubectl<E> {
    pub fn with_executor(
        bin: impl Into<String>,
        namespace: Option<String>,
        executor: E,
        timeout_secs: u64,
    ) -> Self {
        Self {
            bin: bin.into(),
            namespace,
            executor,
            timeout_secs,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn command(&self, args: &[&str]) -> CommandSpec {
        let mut argv = vec![self.bin.clone()];
        argv.extend(args.iter().map(|a| a.to_string()));
        if let Some(ns) = &self.namespace {
            argv.push("-n".to_string());
            argv.push(ns.clone());
        }
        CommandSpec::new(argv, self.timeout_secs)
    }
}

#[async_trait]
impl<E: CommandExecutor> Orchestrator for Kubectl<E> {
    async fn apply(&self, manifest: &Path, cancel: &CancellationToken) -> Result<CommandOutput> {
        let path = manifest.display().to_string();
        let spec = self.command(&["apply", "-f", &path]);
        self.executor.execute(&spec, cancel).await
    }

    async fn list_workloads(
        &self,
        name_substring: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkloadStatus>> {
        let spec = self.command(&["get", "pods", "--no-headers"]);
        let output = self.executor.execute(&spec, cancel).await?;
        if !output.success() {
            return Err(CodeAidError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!(
                    "'{}' exited with {:?}: {}",
                    output.command,
                    output.exit_code,
                    output.stderr.trim()
                ),
            )));
        }
        Ok(parse_pod_listing(&output.stdout)
            .into_iter()
            .filter(|w| w.name.contains(name_substring))
            .collect())
    }

    async fn logs(&self, workload: &str, cancel: &CancellationToken) -> Result<CommandOutput> {
        let spec = self.command(&["logs", workload]);
        self.executor.execute(&spec, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeaid_core::fakes::{RecordingExecutor, ScriptedCommand};

    const LISTING: &str = "\
codeaidapter-abc-5d9f7c-x2x   1/1   Running            0   12s
codeaidapter-abc-job-77kq     0/1   Completed          0   40s
other-service-6b4-zz          0/1   CrashLoopBackOff   4   3m
broken-line
";

    #[test]
    fn test_parse_pod_listing() {
        let pods = parse_pod_listing(LISTING);
        assert_eq!(pods.len(), 3);
        assert_eq!(pods[0].phase, WorkloadPhase::Running);
        assert_eq!(pods[1].phase, WorkloadPhase::Completed);
        assert_eq!(pods[2].phase, WorkloadPhase::CrashLoopBackOff);
        assert!(!pods[2].phase.is_healthy());
    }

    #[test]
    fn test_unknown_status_is_preserved() {
        let phase = WorkloadPhase::parse("ImagePullBackOff");
        assert_eq!(phase, WorkloadPhase::Other("ImagePullBackOff".to_string()));
        assert_eq!(phase.to_string(), "ImagePullBackOff");
        assert!(!phase.is_healthy());
    }

    #[test]
    fn test_started_phases() {
        for waiting in ["Pending", "ContainerCreating", "PodInitializing", "ImagePullBackOff", "ErrImagePull"] {
            assert!(!WorkloadPhase::parse(waiting).is_started(), "{}", waiting);
        }
        for settled in ["Running", "Completed", "CrashLoopBackOff", "Error", "OOMKilled"] {
            assert!(WorkloadPhase::parse(settled).is_started(), "{}", settled);
        }
    }

    #[tokio::test]
    async fn test_list_filters_by_service_name_and_namespace() {
        let kubectl = Kubectl::with_executor(
            "kubectl",
            Some("apps".to_string()),
            RecordingExecutor::succeeding(LISTING),
            30,
        );
        let pods = kubectl
            .list_workloads("codeaidapter-abc", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(pods.len(), 2);
        assert_eq!(
            kubectl.executor().calls()[0].display(),
            "kubectl get pods --no-headers -n apps"
        );
    }

    #[tokio::test]
    async fn test_list_failure_is_error() {
        let kubectl = Kubectl::with_executor(
            "kubectl",
            None,
            RecordingExecutor::succeeding("")
                .with_script([ScriptedCommand::fail(1, "connection refused")]),
            30,
        );
        assert!(kubectl
            .list_workloads("svc", &CancellationToken::new())
            .await
            .is_err());
        let empty = kubectl
            .list_workloads("svc", &CancellationToken::new())
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_apply_and_logs_commands() {
        let kubectl = Kubectl::with_executor("kubectl", None, RecordingExecutor::succeeding(""), 30);
        let cancel = CancellationToken::new();
        kubectl
            .apply(Path::new("tmp/svc/config.yaml"), &cancel)
            .await
            .unwrap();
        kubectl.logs("svc-pod", &cancel).await.unwrap();
        let calls = kubectl.executor().calls();
        assert_eq!(calls[0].display(), "kubectl apply -f tmp/svc/config.yaml");
        assert_eq!(calls[1].display(), "kubectl logs svc-pod");
    }
}
