//! Bounded polling for a rolled-out workload.
//!
//! Two checkpoints are kept apart: *observed* (a workload matching the service
//! name has started, see [`crate::orchestrator::WorkloadPhase::is_started`]) and *healthy* (that
//! workload is Running or Completed). A listed workload that is still pending
//! is not observed yet. Polling stops at the first observation.

use std::time::Duration;

use codeaid_core::{CodeAidError, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::orchestrator::{Orchestrator, WorkloadStatus};
use crate::stage::DeployStage;
use crate::state::DeploymentState;

/// Fixed poll budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessPolicy {
    pub attempts: u32,
    /// Pause between consecutive polls; none after the last.
    pub delay: Duration,
}

impl ReadinessPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Upper bound on time spent sleeping.
    pub fn max_cumulative_delay(&self) -> Duration {
        self.delay * self.attempts.saturating_sub(1)
    }
}

/// Outcome of polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub polls: u32,
    /// First matching started workload, if one appeared within budget.
    pub observed: Option<WorkloadStatus>,
    pub healthy: bool,
    /// Latest matching workload that had not started yet.
    #[serde(default)]
    pub last_waiting: Option<WorkloadStatus>,
}

impl ReadinessReport {
    pub fn is_observed(&self) -> bool {
        self.observed.is_some()
    }
}

/// Pick the workload to report: a healthy one when several match.
fn choose(mut workloads: Vec<WorkloadStatus>) -> Option<WorkloadStatus> {
    match workloads.iter().position(|w| w.phase.is_healthy()) {
        Some(i) => Some(workloads.swap_remove(i)),
        None => workloads.into_iter().next(),
    }
}

/// Poll `orchestrator` until a workload named after `service` has started or the budget runs out.
///
/// Listing errors count as empty polls. Only cancellation is an `Err`.
pub async fn await_workload(
    orchestrator: &dyn Orchestrator,
    service: &str,
    policy: &ReadinessPolicy,
    state: &mut DeploymentState,
    cancel: &CancellationToken,
) -> Result<ReadinessReport> {
    let mut polls = 0;
    let mut last_waiting = None;
    for attempt in 1..=policy.attempts {
        if attempt > 1 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(CodeAidError::Cancelled {
                        operation: "readiness polling".to_string(),
                    });
                }
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
        polls = attempt;

        match orchestrator.list_workloads(service, cancel).await {
            Ok(workloads) => {
                let (started, waiting): (Vec<_>, Vec<_>) =
                    workloads.into_iter().partition(|w| w.phase.is_started());
                if let Some(found) = choose(started) {
                    let healthy = found.phase.is_healthy();
                    state.note(
                        DeployStage::AwaitReady,
                        format!(
                            "Poll {}/{}: workload {} observed ({})",
                            attempt, policy.attempts, found.name, found.phase
                        ),
                        true,
                    );
                    state.note(
                        DeployStage::AwaitReady,
                        format!(
                            "Workload {} healthy: {}",
                            found.name,
                            if healthy { "yes" } else { "no" }
                        ),
                        healthy,
                    );
                    tracing::info!(service = %service, workload = %found.name, phase = %found.phase, polls, "Workload observed");
                    return Ok(ReadinessReport {
                        polls,
                        observed: Some(found),
                        healthy,
                        last_waiting,
                    });
                }
                match waiting.into_iter().next() {
                    Some(pending) => {
                        state.note(
                            DeployStage::AwaitReady,
                            format!(
                                "Poll {}/{}: workload {} not started yet ({})",
                                attempt, policy.attempts, pending.name, pending.phase
                            ),
                            false,
                        );
                        last_waiting = Some(pending);
                    }
                    None => state.note(
                        DeployStage::AwaitReady,
                        format!(
                            "Poll {}/{}: no workload matching {}",
                            attempt, policy.attempts, service
                        ),
                        false,
                    ),
                }
            }
            Err(e @ CodeAidError::Cancelled { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(service = %service, attempt, error = %e, "Workload listing failed");
                state.note(
                    DeployStage::AwaitReady,
                    format!("Poll {}/{} failed: {}", attempt, policy.attempts, e),
                    false,
                );
            }
        }
    }

    Ok(ReadinessReport {
        polls,
        observed: None,
        healthy: false,
        last_waiting,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeOrchestrator;
    use crate::orchestrator::WorkloadPhase;

    fn pod(name: &str, phase: WorkloadPhase) -> WorkloadStatus {
        WorkloadStatus {
            name: name.to_string(),
            phase,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_bounds_polls_and_delay() {
        let orchestrator = FakeOrchestrator::new();
        let policy = ReadinessPolicy::new(10, Duration::from_secs(3));
        let mut state = DeploymentState::new(2000);
        let start = tokio::time::Instant::now();

        let report = await_workload(
            &orchestrator,
            "codeaidapter-x",
            &policy,
            &mut state,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(!report.is_observed());
        assert_eq!(report.polls, 10);
        assert_eq!(orchestrator.list_calls(), 10);
        assert!(start.elapsed() <= policy.max_cumulative_delay());
        assert_eq!(policy.max_cumulative_delay(), Duration::from_secs(27));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_looping_workload_counts_as_observed() {
        let orchestrator = FakeOrchestrator::new();
        orchestrator.script_listing(vec![]);
        orchestrator.script_listing(vec![pod("codeaidapter-x-1", WorkloadPhase::CrashLoopBackOff)]);
        let mut state = DeploymentState::new(2000);

        let report = await_workload(
            &orchestrator,
            "codeaidapter-x",
            &ReadinessPolicy::new(10, Duration::from_secs(3)),
            &mut state,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(report.is_observed());
        assert!(!report.healthy);
        assert_eq!(report.polls, 2);
        assert!(state.render().contains("healthy: no"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_workload_keeps_polling() {
        let orchestrator = FakeOrchestrator::new();
        orchestrator.script_listing(vec![pod("codeaidapter-x-1", WorkloadPhase::Pending)]);
        orchestrator.script_listing(vec![pod("codeaidapter-x-1", WorkloadPhase::Running)]);
        let mut state = DeploymentState::new(2000);

        let report = await_workload(
            &orchestrator,
            "codeaidapter-x",
            &ReadinessPolicy::new(10, Duration::from_secs(3)),
            &mut state,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.polls, 2);
        assert!(report.healthy);
        assert_eq!(report.observed.unwrap().phase, WorkloadPhase::Running);
        assert!(state.render().contains("not started yet (Pending)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_pull_backoff_never_counts_as_observed() {
        let orchestrator = FakeOrchestrator::new();
        for _ in 0..3 {
            orchestrator.script_listing(vec![pod(
                "codeaidapter-x-1",
                WorkloadPhase::parse("ImagePullBackOff"),
            )]);
        }
        let mut state = DeploymentState::new(2000);

        let report = await_workload(
            &orchestrator,
            "codeaidapter-x",
            &ReadinessPolicy::new(3, Duration::from_secs(1)),
            &mut state,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(!report.is_observed());
        assert_eq!(report.polls, 3);
        assert_eq!(
            report.last_waiting.map(|w| w.phase.to_string()).as_deref(),
            Some("ImagePullBackOff")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_errors_consume_polls() {
        let orchestrator = FakeOrchestrator::new();
        orchestrator.script_listing_error("connection refused");
        orchestrator.script_listing(vec![pod("codeaidapter-x-1", WorkloadPhase::Running)]);
        let mut state = DeploymentState::new(2000);

        let report = await_workload(
            &orchestrator,
            "codeaidapter-x",
            &ReadinessPolicy::new(3, Duration::from_secs(1)),
            &mut state,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(report.healthy);
        assert_eq!(report.polls, 2);
        assert!(state.render().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let orchestrator = FakeOrchestrator::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut state = DeploymentState::new(2000);

        let err = await_workload(
            &orchestrator,
            "svc",
            &ReadinessPolicy::new(5, Duration::from_secs(3)),
            &mut state,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CodeAidError::Cancelled { .. }));
        assert_eq!(orchestrator.list_calls(), 1);
    }

    #[test]
    fn test_choose_prefers_healthy() {
        let chosen = choose(vec![
            pod("a", WorkloadPhase::CrashLoopBackOff),
            pod("b", WorkloadPhase::Running),
        ])
        .unwrap();
        assert_eq!(chosen.name, "b");
    }
}
