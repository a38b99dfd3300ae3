//! Bounded generate → execute → repair loop.
//!
//! ```text
//! GENERATE ──► EXECUTE ──► SUCCESS
//!    ▲            │
//!    └── RETRY ◄──┤ (repairs < max_repairs)
//!                 └──► EXHAUSTED
//! ```
//!
//! Only execution failures consume repair budget. Detection, parse and
//! generator errors abort the run straight away.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::domain::{
    Artifact, CodeAidError, CodeRequest, CodeResponse, ExecutionResult, Language, TaskVariant,
};
use crate::generator::ArtifactGenerator;
use crate::housekeeping::{ImageCache, ImagePruner, PruneReport};
use crate::language::detect_language;
use crate::llm::TextGenerator;
use crate::obs;
use crate::sandbox::{ContainerRuntime, ExecutionSandbox, SandboxConfig};

/// Bound on repair attempts after the initial one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPolicy {
    pub max_repairs: u32,
    /// Remove images this run pulled once it finishes.
    pub prune_images: bool,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_repairs: 3,
            prune_images: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    Initial,
    Repair,
}

/// One generate-and-execute round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 0 for the initial artifact, 1..=max_repairs for repairs.
    pub attempt: u32,
    pub phase: AttemptPhase,
    pub language: Language,
    pub image: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub succeeded: bool,
    pub duration_ms: u64,
}

impl AttemptRecord {
    fn new(attempt: u32, artifact: &Artifact, result: &ExecutionResult) -> Self {
        Self {
            attempt,
            phase: if attempt == 0 {
                AttemptPhase::Initial
            } else {
                AttemptPhase::Repair
            },
            language: artifact.language,
            image: artifact.image_reference(),
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            succeeded: result.succeeded(),
            duration_ms: result.duration_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    Succeeded,
    /// Every repair was spent and the last artifact still failed.
    Exhausted,
    /// Stopped by an error that does not consume repair budget.
    Aborted,
}

/// Full record of one repair run.
#[derive(Debug, Serialize)]
pub struct RepairRun {
    pub run_id: String,
    pub task: TaskVariant,
    pub detected_language: Language,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempts: Vec<AttemptRecord>,
    pub outcome: RepairOutcome,
    #[serde(skip)]
    pub failure: Option<CodeAidError>,
    pub prune: Option<PruneReport>,
    pub response: CodeResponse,
}

impl RepairRun {
    /// Repairs performed, not counting the initial attempt.
    pub fn repairs_used(&self) -> u32 {
        self.attempts
            .iter()
            .filter(|a| a.phase == AttemptPhase::Repair)
            .count() as u32
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == RepairOutcome::Succeeded
    }
}

/// Where the loop stopped, before housekeeping and bookkeeping.
struct LoopEnd {
    outcome: RepairOutcome,
    failure: Option<CodeAidError>,
    response: CodeResponse,
}

impl LoopEnd {
    fn aborted(err: CodeAidError, last: Option<&Artifact>) -> Self {
        let response = match last {
            Some(artifact) => CodeResponse::from_artifact(artifact, false, err.to_string()),
            None => CodeResponse::bare_failure(err.to_string()),
        };
        Self {
            outcome: RepairOutcome::Aborted,
            failure: Some(err),
            response,
        }
    }
}

/// Drives one request through generation, execution and repair.
pub struct RepairLoop {
    generator: ArtifactGenerator,
    sandbox: ExecutionSandbox,
    pruner: ImagePruner,
    policy: RepairPolicy,
}

impl RepairLoop {
    pub fn new(generator: ArtifactGenerator, sandbox: ExecutionSandbox, pruner: ImagePruner) -> Self {
        Self {
            generator,
            sandbox,
            pruner,
            policy: RepairPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RepairPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RepairPolicy {
        &self.policy
    }

    /// Share prune coordination with other loops on the same container host.
    pub fn with_image_cache(mut self, cache: Arc<ImageCache>) -> Self {
        self.pruner = self.pruner.with_cache(cache);
        self
    }

    /// Run `request` through `task` to a single terminal outcome.
    pub async fn run(
        &self,
        request: &CodeRequest,
        task: TaskVariant,
        cancel: &CancellationToken,
    ) -> RepairRun {
        let run_id = Uuid::new_v4().simple().to_string();
        let span = obs::run_span(&run_id, "repair");
        self.run_with_id(run_id, request, task, cancel)
            .instrument(span)
            .await
    }

    async fn run_with_id(
        &self,
        run_id: String,
        request: &CodeRequest,
        task: TaskVariant,
        cancel: &CancellationToken,
    ) -> RepairRun {
        let started_at = Utc::now();
        let clock = Instant::now();
        obs::emit_run_started(&run_id, "repair");

        let mut attempts = Vec::new();
        let mut referenced = Vec::new();
        let mut detected_language = Language::Unknown;

        let (end, prune) = match request.source() {
            None => (LoopEnd::aborted(CodeAidError::MissingSource, None), None),
            Some(source) => {
                detected_language = detect_language(source);
                if detected_language == Language::Unknown {
                    (LoopEnd::aborted(CodeAidError::LanguageDetection, None), None)
                } else {
                    let lease = self.pruner.lease().await;
                    let snapshot = if self.policy.prune_images {
                        self.pruner.snapshot(cancel).await
                    } else {
                        None
                    };

                    let end = self
                        .drive(
                            &run_id,
                            task,
                            detected_language,
                            source,
                            &request.prompt,
                            &mut attempts,
                            &mut referenced,
                            cancel,
                        )
                        .await;

                    let prune = match snapshot {
                        Some(before) => {
                            let report =
                                self.pruner.prune(&before, &referenced, lease, cancel).await;
                            for (image, reason) in &report.failed {
                                obs::emit_housekeeping_error(
                                    &run_id,
                                    &format!("{}: {}", image, reason),
                                );
                            }
                            Some(report)
                        }
                        None => {
                            drop(lease);
                            None
                        }
                    };
                    (end, prune)
                }
            }
        };

        if let Some(err) = &end.failure {
            tracing::warn!(run_id = %run_id, outcome = ?end.outcome, error = %err, "Repair run did not succeed");
        }
        obs::emit_run_finished(
            &run_id,
            clock.elapsed().as_millis() as u64,
            attempts.len() as u64,
            end.outcome == RepairOutcome::Succeeded,
        );

        RepairRun {
            run_id,
            task,
            detected_language,
            started_at,
            finished_at: Utc::now(),
            attempts,
            outcome: end.outcome,
            failure: end.failure,
            prune,
            response: end.response,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        run_id: &str,
        task: TaskVariant,
        language: Language,
        source: &str,
        prompt: &str,
        attempts: &mut Vec<AttemptRecord>,
        referenced: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> LoopEnd {
        let mut artifact = match self
            .generator
            .generate(task, language, source, prompt, cancel)
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => return LoopEnd::aborted(e, None),
        };

        let mut attempt = 0u32;
        loop {
            referenced.push(artifact.image_reference());
            let result = match self.sandbox.run(&artifact, run_id, attempt, cancel).await {
                Ok(result) => result,
                Err(e) => return LoopEnd::aborted(e, Some(&artifact)),
            };

            let record = AttemptRecord::new(attempt, &artifact, &result);
            obs::emit_attempt_finished(run_id, attempt, record.exit_code, record.succeeded);
            attempts.push(record);

            if result.succeeded() {
                return LoopEnd {
                    outcome: RepairOutcome::Succeeded,
                    failure: None,
                    response: CodeResponse::from_artifact(&artifact, true, result.output),
                };
            }

            if attempt >= self.policy.max_repairs {
                let response = CodeResponse::from_artifact(&artifact, false, result.output.clone());
                return LoopEnd {
                    outcome: RepairOutcome::Exhausted,
                    failure: Some(CodeAidError::RepairExhausted {
                        attempts: attempt,
                        last_output: result.output,
                    }),
                    response,
                };
            }

            attempt += 1;
            tracing::info!(run_id = %run_id, attempt, "Requesting repair");
            artifact = match self
                .generator
                .repair(&artifact, &result.output, prompt, cancel)
                .await
            {
                Ok(next) => next,
                Err(e) => return LoopEnd::aborted(e, Some(&artifact)),
            };
        }
    }
}

/// Wire a loop from shared backends with default policy.
pub fn build_repair_loop(
    text: Arc<dyn TextGenerator>,
    runtime: Arc<dyn ContainerRuntime>,
    generator_timeout_secs: u64,
    sandbox: SandboxConfig,
) -> RepairLoop {
    RepairLoop::new(
        ArtifactGenerator::new(text, generator_timeout_secs),
        ExecutionSandbox::new(runtime.clone(), sandbox),
        ImagePruner::new(runtime),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeContainerRuntime, RunScript, ScriptedGenerator};
    use std::time::Duration;

    fn reply(code: &str) -> String {
        serde_json::json!({
            "code": code,
            "language": "python",
            "docker_image": "python:3.12",
            "class_name": "output",
        })
        .to_string()
    }

    fn repair_loop(
        replies: Vec<String>,
        runtime: Arc<FakeContainerRuntime>,
        root: &std::path::Path,
    ) -> (RepairLoop, Arc<ScriptedGenerator>) {
        let text = Arc::new(ScriptedGenerator::new(replies));
        let lp = build_repair_loop(
            text.clone(),
            runtime,
            5,
            SandboxConfig::default().with_work_root(root),
        );
        (lp, text)
    }

    #[test]
    fn test_default_policy() {
        let policy = RepairPolicy::default();
        assert_eq!(policy.max_repairs, 3);
        assert!(policy.prune_images);
    }

    #[tokio::test]
    async fn test_missing_source_aborts_without_calls() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeContainerRuntime::new());
        let (lp, text) = repair_loop(vec![], runtime.clone(), root.path());

        let run = lp
            .run(&CodeRequest::new("fix it"), TaskVariant::BugFix, &CancellationToken::new())
            .await;
        assert_eq!(run.outcome, RepairOutcome::Aborted);
        assert!(matches!(run.failure, Some(CodeAidError::MissingSource)));
        assert_eq!(text.call_count(), 0);
        assert!(runtime.runs().is_empty());
    }

    #[tokio::test]
    async fn test_generation_parse_failure_spends_no_budget() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeContainerRuntime::new());
        let (lp, text) = repair_loop(vec!["not json at all".into()], runtime.clone(), root.path());

        let request = CodeRequest::new("").with_source("print('hi'");
        let run = lp.run(&request, TaskVariant::BugFix, &CancellationToken::new()).await;
        assert_eq!(run.outcome, RepairOutcome::Aborted);
        assert!(matches!(run.failure, Some(CodeAidError::GenerationParse { .. })));
        assert_eq!(text.call_count(), 1);
        assert!(runtime.runs().is_empty());
        assert!(!run.response.status);
    }

    #[tokio::test]
    async fn test_repair_parse_failure_keeps_last_artifact() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeContainerRuntime::new());
        runtime.script_run(RunScript::exit(1, "", "SyntaxError"));
        let (lp, _text) = repair_loop(
            vec![reply("print('hi'"), "garbage".into()],
            runtime.clone(),
            root.path(),
        );

        let request = CodeRequest::new("").with_source("print('hi'");
        let run = lp.run(&request, TaskVariant::BugFix, &CancellationToken::new()).await;
        assert_eq!(run.outcome, RepairOutcome::Aborted);
        assert_eq!(run.attempts.len(), 1);
        assert_eq!(run.response.file, "print('hi'");
        assert_eq!(run.response.filename, "output.py");
    }

    #[tokio::test]
    async fn test_succeeds_after_one_repair() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeContainerRuntime::new());
        runtime.script_run(RunScript::exit(1, "", "NameError: x"));
        runtime.script_run(RunScript::exit(0, "3\n", ""));
        let (lp, text) = repair_loop(
            vec![reply("print(x)"), reply("print(3)")],
            runtime.clone(),
            root.path(),
        );

        let request = CodeRequest::new("").with_source("print(x)");
        let run = lp.run(&request, TaskVariant::BugFix, &CancellationToken::new()).await;
        assert!(run.succeeded());
        assert_eq!(run.repairs_used(), 1);
        assert_eq!(run.response.file, "print(3)");
        assert_eq!(run.response.success_msg(), Some("3\n"));
        assert_eq!(text.call_count(), 2);
        assert!(text.calls()[1].0.contains("NameError: x"));
    }

    #[tokio::test]
    async fn test_pruning_skips_preexisting_images() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeContainerRuntime::new().with_images(["python:3.12"]));
        runtime.script_run(RunScript::exit(0, "hi\n", ""));
        let (lp, _text) = repair_loop(vec![reply("print('hi')")], runtime.clone(), root.path());

        let request = CodeRequest::new("").with_source("print('hi')");
        let run = lp.run(&request, TaskVariant::BugFix, &CancellationToken::new()).await;
        assert!(run.succeeded());
        assert!(runtime.removed_images().is_empty());
        assert_eq!(run.prune, Some(PruneReport::default()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_loops_keep_images_until_last_finishes() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeContainerRuntime::new());
        runtime.script_run(RunScript::exit(0, "hi\n", ""));
        runtime.script_run(RunScript::exit(0, "hi\n", ""));
        let cache = ImageCache::new();

        let quick_loop = |delay: u64| {
            let text = Arc::new(
                ScriptedGenerator::new([reply("print('hi')")]).with_delay(Duration::from_secs(delay)),
            );
            build_repair_loop(
                text,
                runtime.clone(),
                30,
                SandboxConfig::default().with_work_root(root.path()),
            )
            .with_image_cache(cache.clone())
        };
        let early = quick_loop(1);
        let late = quick_loop(5);

        let request = CodeRequest::new("").with_source("print('hi')");
        let cancel = CancellationToken::new();
        let (first, second) = tokio::join!(
            early.run(&request, TaskVariant::BugFix, &cancel),
            late.run(&request, TaskVariant::BugFix, &cancel),
        );

        assert!(first.succeeded() && second.succeeded());
        let first_prune = first.prune.unwrap();
        assert!(first_prune.removed.is_empty());
        assert_eq!(first_prune.deferred, vec!["python:3.12"]);
        assert_eq!(second.prune.unwrap().removed, vec!["python:3.12"]);
        assert_eq!(runtime.removed_images(), vec!["python:3.12"]);
        assert!(cache.deferred().is_empty());
    }

    #[tokio::test]
    async fn test_pruning_disabled_by_policy() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeContainerRuntime::new());
        runtime.script_run(RunScript::exit(0, "hi\n", ""));
        let (lp, _text) = repair_loop(vec![reply("print('hi')")], runtime.clone(), root.path());
        let lp = lp.with_policy(RepairPolicy {
            max_repairs: 3,
            prune_images: false,
        });

        let request = CodeRequest::new("").with_source("print('hi')");
        let run = lp.run(&request, TaskVariant::BugFix, &CancellationToken::new()).await;
        assert!(run.prune.is_none());
        assert_eq!(runtime.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_run() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeContainerRuntime::new());
        let (lp, _text) = repair_loop(vec![reply("print('hi')")], runtime, root.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = CodeRequest::new("").with_source("print('hi')");
        let run = lp.run(&request, TaskVariant::BugFix, &cancel).await;
        assert_eq!(run.outcome, RepairOutcome::Aborted);
        assert!(matches!(run.failure, Some(CodeAidError::Cancelled { .. })));
    }
}
