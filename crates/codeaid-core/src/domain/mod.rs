//! Domain models for CodeAid.
//!
//! - `CodeRequest` / `TaskVariant`: what the caller asked for
//! - `Artifact`: generated code plus how to run it
//! - `ExecutionResult`: what one sandboxed run produced
//! - `CodeResponse`: the terminal, single-message outcome

pub mod artifact;
pub mod error;
pub mod execution;
pub mod request;
pub mod response;

pub use artifact::{normalize_image_reference, Artifact, Language, SCRIPT_ENTRY};
pub use error::{CodeAidError, Result};
pub use execution::ExecutionResult;
pub use request::{CodeRequest, TaskVariant};
pub use response::{ApiEnvelope, CodeResponse, EnvelopeStatus, GenerationBody};
