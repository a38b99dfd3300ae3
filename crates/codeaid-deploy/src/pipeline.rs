//! Deployment pipeline orchestration.
//!
//! ```text
//! SPEC → BUILD → TAG → PUSH → APPLY → AWAIT_READY → LOGS → REPORT
//! ```
//!
//! Every stage up to and including AWAIT_READY is a gate: the first failure
//! skips everything after it except the report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use codeaid_core::{
    detect_language, obs, CodeAidError, CodeRequest, CodeResponse, CommandOutput, ContainerRuntime,
    Language, Result, TextGenerator,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

use crate::config::DeployConfig;
use crate::orchestrator::Orchestrator;
use crate::readiness::{await_workload, ReadinessPolicy, ReadinessReport};
use crate::report::{append_narrative, assemble_report, write_run_record, RunRecord};
use crate::spec_gen::{new_service_name, DeploymentSpec, DeploymentSpecGenerator, DOCKERFILE, MANIFEST_FILE};
use crate::stage::DeployStage;
use crate::state::DeploymentState;

/// Full record of one deployment run.
#[derive(Debug, Serialize)]
pub struct DeploymentRun {
    pub service_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub spec: Option<DeploymentSpec>,
    pub state: DeploymentState,
    pub readiness: Option<ReadinessReport>,
    /// First gate that failed.
    pub failed_stage: Option<DeployStage>,
    #[serde(skip)]
    pub failure: Option<CodeAidError>,
    /// Where `run.json` was written, when the service directory exists.
    pub record_path: Option<PathBuf>,
    pub response: CodeResponse,
}

impl DeploymentRun {
    pub fn succeeded(&self) -> bool {
        self.failed_stage.is_none()
    }

    /// Workload listed within the poll budget.
    pub fn observed(&self) -> bool {
        self.readiness.as_ref().is_some_and(|r| r.is_observed())
    }

    /// Workload Running or Completed.
    pub fn healthy(&self) -> bool {
        self.readiness.as_ref().is_some_and(|r| r.healthy)
    }
}

/// A gate failure: the stage and its typed error.
struct GateFailure {
    stage: DeployStage,
    error: CodeAidError,
}

impl GateFailure {
    fn new(stage: DeployStage, error: CodeAidError) -> Self {
        Self { stage, error }
    }
}

/// Mutable bookkeeping threaded through the stages.
struct Progress {
    state: DeploymentState,
    spec: Option<DeploymentSpec>,
    readiness: Option<ReadinessReport>,
    service_dir: Option<PathBuf>,
}

/// Builds, pushes and rolls out one service per call.
pub struct DeploymentPipeline {
    spec_gen: DeploymentSpecGenerator,
    runtime: Arc<dyn ContainerRuntime>,
    orchestrator: Arc<dyn Orchestrator>,
    config: DeployConfig,
}

impl DeploymentPipeline {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        runtime: Arc<dyn ContainerRuntime>,
        orchestrator: Arc<dyn Orchestrator>,
        config: DeployConfig,
    ) -> Self {
        Self {
            spec_gen: DeploymentSpecGenerator::new(text, config.generator_timeout_secs),
            runtime,
            orchestrator,
            config,
        }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Deploy the source in `request` under a fresh service name.
    pub async fn run(&self, request: &CodeRequest, cancel: &CancellationToken) -> DeploymentRun {
        self.run_named(new_service_name(), request, cancel).await
    }

    /// Deploy under a caller-chosen service name.
    pub async fn run_named(
        &self,
        service_name: impl Into<String>,
        request: &CodeRequest,
        cancel: &CancellationToken,
    ) -> DeploymentRun {
        let service_name = service_name.into();
        let span = obs::run_span(&service_name, "deploy");
        self.execute(service_name, request, cancel)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        service_name: String,
        request: &CodeRequest,
        cancel: &CancellationToken,
    ) -> DeploymentRun {
        let started_at = Utc::now();
        let clock = Instant::now();
        obs::emit_run_started(&service_name, "deploy");

        let mut progress = Progress {
            state: DeploymentState::new(self.config.output_cap),
            spec: None,
            readiness: None,
            service_dir: None,
        };

        let gate = self
            .drive(&service_name, request, &mut progress, cancel)
            .await;

        let failed_stage = gate.as_ref().err().map(|f| f.stage);
        let failure = gate.err().map(|f| {
            progress
                .state
                .note(f.stage, format!("Failed: {}", f.error), false);
            f.error
        });

        if failed_stage.is_none() {
            if let Some(workload) = progress.readiness.as_ref().and_then(|r| r.observed.clone()) {
                self.collect_logs(&workload.name, &mut progress.state, cancel)
                    .await;
            }
            progress
                .state
                .note(DeployStage::Report, "Deployment successful.", true);
        }
        progress.state.finish(failed_stage.is_none());

        let mut report = assemble_report(
            &service_name,
            progress.spec.as_ref(),
            &progress.state,
            progress.readiness.as_ref(),
            failed_stage,
        );
        if self.config.narrate_report {
            match self.spec_gen.narrate(&report, cancel).await {
                Ok(narrative) => append_narrative(&mut report, &narrative),
                Err(e) => tracing::warn!(service = %service_name, error = %e, "Report narration failed"),
            }
        }

        let record_path = match &progress.service_dir {
            Some(dir) => {
                let record = RunRecord {
                    service_name: service_name.clone(),
                    spec: progress.spec.clone(),
                    operations: progress.state.entries().to_vec(),
                    readiness: progress.readiness.clone(),
                    success: failed_stage.is_none(),
                    failed_stage,
                    recorded_at: Utc::now(),
                };
                match write_run_record(&record, dir) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        obs::emit_housekeeping_error(&service_name, &e);
                        None
                    }
                }
            }
            None => None,
        };

        let manifest = progress
            .spec
            .as_ref()
            .map(|s| s.manifest.clone())
            .unwrap_or_default();
        let response = if failed_stage.is_none() {
            CodeResponse::success(manifest, MANIFEST_FILE, report)
        } else {
            CodeResponse::failure(manifest, MANIFEST_FILE, report)
        };

        obs::emit_run_finished(
            &service_name,
            clock.elapsed().as_millis() as u64,
            progress.state.entries().len() as u64,
            failed_stage.is_none(),
        );

        DeploymentRun {
            service_name,
            started_at,
            finished_at: Utc::now(),
            spec: progress.spec,
            state: progress.state,
            readiness: progress.readiness,
            failed_stage,
            failure,
            record_path,
            response,
        }
    }

    async fn drive(
        &self,
        service_name: &str,
        request: &CodeRequest,
        progress: &mut Progress,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), GateFailure> {
        let source = request
            .source()
            .ok_or_else(|| GateFailure::new(DeployStage::Normalize, CodeAidError::MissingSource))?;
        let language = detect_language(source);

        // SPEC
        let started = Instant::now();
        let spec = self
            .spec_gen
            .generate_for(
                service_name,
                source,
                request.filename.as_deref(),
                language,
                &request.prompt,
                &self.config.registry,
                cancel,
            )
            .await
            .map_err(|e| GateFailure::new(DeployStage::Manifest, e))?;
        progress.state.note(
            DeployStage::Manifest,
            format!(
                "Generated Dockerfile and {} for {}",
                MANIFEST_FILE, spec.image_ref
            ),
            true,
        );
        obs::emit_stage_finished(service_name, "spec", elapsed_ms(started), true);

        let service_dir = self
            .materialize(&spec, language)
            .map_err(|e| GateFailure::new(DeployStage::Materialize, e))?;
        progress.state.note(
            DeployStage::Materialize,
            format!("Wrote service files to {}", service_dir.display()),
            true,
        );
        progress.service_dir = Some(service_dir.clone());
        progress.spec = Some(spec.clone());

        // BUILD → TAG → PUSH
        progress
            .state
            .note(DeployStage::Build, "Starting Docker push process...", true);
        let started = Instant::now();
        let built = self
            .runtime
            .build(
                &spec.local_tag,
                std::path::Path::new(DOCKERFILE),
                &service_dir,
                self.config.build_timeout_secs,
                cancel,
            )
            .await;
        gate_command(
            DeployStage::Build,
            &format!("docker build -t {} -f {} .", spec.local_tag, DOCKERFILE),
            built,
            &mut progress.state,
            CodeAidError::Build,
        )?;
        obs::emit_stage_finished(service_name, "build", elapsed_ms(started), true);

        let tagged = self
            .runtime
            .tag(&spec.local_tag, &spec.image_ref, cancel)
            .await;
        gate_command(
            DeployStage::Tag,
            &format!("docker tag {} {}", spec.local_tag, spec.image_ref),
            tagged,
            &mut progress.state,
            CodeAidError::Tag,
        )?;

        let started = Instant::now();
        let pushed = self.runtime.push(&spec.image_ref, cancel).await;
        gate_command(
            DeployStage::Push,
            &format!("docker push {}", spec.image_ref),
            pushed,
            &mut progress.state,
            CodeAidError::Push,
        )?;
        obs::emit_stage_finished(service_name, "push", elapsed_ms(started), true);
        progress.state.note(
            DeployStage::Push,
            "Docker push successful. Starting deployment process...",
            true,
        );

        // APPLY
        let manifest_path = service_dir.join(MANIFEST_FILE);
        let applied = self.orchestrator.apply(&manifest_path, cancel).await;
        gate_command(
            DeployStage::Apply,
            &format!("kubectl apply -f {}", manifest_path.display()),
            applied,
            &mut progress.state,
            CodeAidError::Apply,
        )?;

        // AWAIT_READY
        let started = Instant::now();
        let policy = ReadinessPolicy::new(
            self.config.poll_attempts,
            Duration::from_secs(self.config.poll_delay_secs),
        );
        let readiness = await_workload(
            self.orchestrator.as_ref(),
            service_name,
            &policy,
            &mut progress.state,
            cancel,
        )
        .await
        .map_err(|e| GateFailure::new(DeployStage::AwaitReady, e))?;
        progress.readiness = Some(readiness.clone());
        obs::emit_stage_finished(
            service_name,
            "await_ready",
            elapsed_ms(started),
            readiness.is_observed(),
        );

        match &readiness.observed {
            None => Err(GateFailure::new(
                DeployStage::AwaitReady,
                CodeAidError::ReadinessTimeout {
                    service: service_name.to_string(),
                    attempts: readiness.polls,
                },
            )),
            Some(workload) if self.config.require_healthy && !readiness.healthy => {
                Err(GateFailure::new(
                    DeployStage::AwaitReady,
                    CodeAidError::UnhealthyWorkload {
                        workload: workload.name.clone(),
                        phase: workload.phase.to_string(),
                    },
                ))
            }
            Some(_) => Ok(()),
        }
    }

    /// Write Dockerfile, manifest and source into `<deploy_root>/<service>`.
    fn materialize(&self, spec: &DeploymentSpec, language: Language) -> Result<PathBuf> {
        let dir = self.config.service_dir(&spec.service_name);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(DOCKERFILE), &spec.dockerfile)?;
        std::fs::write(dir.join(MANIFEST_FILE), &spec.manifest)?;
        std::fs::write(dir.join(&spec.source_file_name), &spec.source)?;
        info!(
            service = %spec.service_name,
            dir = %dir.display(),
            language = %language,
            "Materialized service directory"
        );
        Ok(dir)
    }

    async fn collect_logs(
        &self,
        workload: &str,
        state: &mut DeploymentState,
        cancel: &CancellationToken,
    ) {
        match self.orchestrator.logs(workload, cancel).await {
            Ok(output) => state.record_command(DeployStage::Logs, &output),
            Err(e) => state.record_command_error(
                DeployStage::Logs,
                &format!("kubectl logs {}", workload),
                &e,
            ),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Record a command step and turn a failure into a [`GateFailure`].
fn gate_command(
    stage: DeployStage,
    rendered: &str,
    result: Result<CommandOutput>,
    state: &mut DeploymentState,
    to_error: fn(String) -> CodeAidError,
) -> std::result::Result<(), GateFailure> {
    match result {
        Ok(output) => {
            state.record_command(stage, &output);
            if output.success() {
                Ok(())
            } else {
                let detail = if output.stderr.trim().is_empty() {
                    format!("'{}' exited with {:?}", output.command, output.exit_code)
                } else {
                    output.stderr.trim().to_string()
                };
                Err(GateFailure::new(stage, to_error(detail)))
            }
        }
        Err(e @ CodeAidError::Cancelled { .. }) => {
            state.record_command_error(stage, rendered, &e);
            Err(GateFailure::new(stage, e))
        }
        Err(e) => {
            state.record_command_error(stage, rendered, &e);
            Err(GateFailure::new(stage, to_error(e.to_string())))
        }
    }
}
