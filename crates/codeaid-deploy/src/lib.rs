//! CodeAid Deploy
//!
//! Turns a source file into a running workload: generated build file and
//! manifest, image build, tag and push, rollout, bounded readiness polling and
//! a consolidated report.

pub mod config;
pub mod fakes;
pub mod orchestrator;
pub mod pipeline;
pub mod readiness;
pub mod report;
pub mod spec_gen;
pub mod stage;
pub mod state;

pub use config::{DeployConfig, RegistryTarget};
pub use orchestrator::{parse_pod_listing, Kubectl, Orchestrator, WorkloadPhase, WorkloadStatus};
pub use pipeline::{DeploymentPipeline, DeploymentRun};
pub use readiness::{await_workload, ReadinessPolicy, ReadinessReport};
pub use report::{
    assemble_report, read_run_record, write_run_record, RunRecord, RUN_DIGEST_FILE, RUN_RECORD_FILE,
};
pub use spec_gen::{
    new_service_name, DeploymentSpec, DeploymentSpecGenerator, DOCKERFILE, MANIFEST_FILE,
};
pub use stage::DeployStage;
pub use state::{DeploymentState, OperationEntry};
