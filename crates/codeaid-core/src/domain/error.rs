//! Domain-level error taxonomy for CodeAid.

/// CodeAid domain errors.
///
/// A failed run of generated code is not an error: it is carried as an
/// [`ExecutionResult`](crate::domain::ExecutionResult) value and feeds the
/// repair loop.
#[derive(Debug, thiserror::Error)]
pub enum CodeAidError {
    #[error("could not determine the programming language")]
    LanguageDetection,

    #[error("generated reply could not be parsed: {reason}")]
    GenerationParse { reason: String },

    #[error("text generation failed: {0}")]
    Generator(String),

    #[error("repair exhausted after {attempts} attempt(s): {last_output}")]
    RepairExhausted { attempts: u32, last_output: String },

    #[error("deployment spec generation failed: {0}")]
    SpecGeneration(String),

    #[error("image build failed: {0}")]
    Build(String),

    #[error("image tag failed: {0}")]
    Tag(String),

    #[error("image push failed: {0}")]
    Push(String),

    #[error("manifest apply failed: {0}")]
    Apply(String),

    #[error("workload {service} not observed after {attempts} poll(s)")]
    ReadinessTimeout { service: String, attempts: u32 },

    #[error("workload {workload} observed but unhealthy: {phase}")]
    UnhealthyWorkload { workload: String, phase: String },

    #[error("housekeeping failed: {0}")]
    Housekeeping(String),

    #[error("{operation} timed out after {limit_secs}s")]
    Timeout { operation: String, limit_secs: u64 },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("request has no source code to process")]
    MissingSource,

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodeAidError {
    /// Whether this error ends a run before any retry budget is spent.
    pub fn is_terminal_before_retry(&self) -> bool {
        matches!(
            self,
            CodeAidError::LanguageDetection
                | CodeAidError::GenerationParse { .. }
                | CodeAidError::MissingSource
        )
    }
}

/// Result type for CodeAid domain operations.
pub type Result<T> = std::result::Result<T, CodeAidError>;
