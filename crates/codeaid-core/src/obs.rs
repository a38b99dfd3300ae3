//! Structured observability hooks for CodeAid run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`], attached with `Instrument`
//! - Emission functions for key lifecycle events: start, attempt, stage, finish
//!
//! Events are emitted at `info!` level; filter with `RUST_LOG`.

use tracing::info;

/// Span tagged with the run id, for `.instrument(...)` on a run's future.
///
/// # Example
///
/// ```ignore
/// loop.run(&request, task, &cancel).instrument(run_span("3f2a", "repair")).await;
/// ```
pub fn run_span(run_id: &str, kind: &str) -> tracing::Span {
    tracing::info_span!("codeaid.run", run_id = %run_id, kind = %kind)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, kind: &str) {
    info!(event = "run.started", run_id = %run_id, kind = %kind);
}

/// Emit event: one generate-and-execute attempt finished.
pub fn emit_attempt_finished(run_id: &str, attempt: u32, exit_code: Option<i32>, success: bool) {
    info!(
        event = "run.attempt_finished",
        run_id = %run_id,
        attempt = attempt,
        exit_code = ?exit_code,
        success = success,
    );
}

/// Emit event: a deployment stage finished.
pub fn emit_stage_finished(run_id: &str, stage: &str, duration_ms: u64, success: bool) {
    info!(
        event = "run.stage_finished",
        run_id = %run_id,
        stage = %stage,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: run finished with duration, attempt or step count, and success status.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, steps: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        steps = steps,
        success = success,
    );
}

/// Emit event: swallowed housekeeping error (warning level).
pub fn emit_housekeeping_error(run_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "run.housekeeping_error", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        // Just ensure the span can be built and entered without a subscriber
        let _entered = run_span("test-run-id", "repair").entered();
        emit_run_started("test-run-id", "repair");
        emit_run_finished("test-run-id", 1, 1, true);
    }
}
