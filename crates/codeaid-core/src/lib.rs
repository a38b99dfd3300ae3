//! CodeAid Core Library
//!
//! Re-exports the components that turn a natural-language request plus
//! source code into a validated artifact: detection, generation, sandboxed
//! execution and the bounded repair loop.

pub mod domain;
pub mod env;
pub mod fakes;
pub mod generator;
pub mod guard;
pub mod housekeeping;
pub mod language;
pub mod llm;
pub mod obs;
pub mod process;
pub mod repair;
pub mod sandbox;
pub mod telemetry;

pub use domain::{
    normalize_image_reference, ApiEnvelope, Artifact, CodeAidError, CodeRequest, CodeResponse,
    EnvelopeStatus, ExecutionResult, GenerationBody, Language, Result, TaskVariant, SCRIPT_ENTRY,
};

pub use generator::{parse_artifact, ArtifactGenerator};
pub use guard::bounded;
pub use housekeeping::{CacheLease, ImageCache, ImagePruner, ImageSnapshot, PruneReport};
pub use language::detect_language;
pub use llm::{OpenAiChat, OpenAiConfig, TextGenerator};
pub use process::{CommandExecutor, CommandOutput, CommandSpec, ProcessExecutor};
pub use repair::{
    build_repair_loop, AttemptPhase, AttemptRecord, RepairLoop, RepairOutcome, RepairPolicy,
    RepairRun,
};
pub use sandbox::{ContainerRun, ContainerRuntime, DockerCli, ExecutionSandbox, SandboxConfig};
pub use telemetry::init_tracing;

pub use tokio_util::sync::CancellationToken;
