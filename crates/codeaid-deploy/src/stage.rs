//! Deployment stages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stages of a deployment run, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeployStage {
    /// Strip non-code noise from the uploaded source.
    Normalize,
    /// Generate the Dockerfile.
    Dockerfile,
    /// Generate the orchestration manifest.
    Manifest,
    /// Write the service working directory.
    Materialize,
    Build,
    Tag,
    Push,
    Apply,
    AwaitReady,
    Logs,
    Report,
}

impl DeployStage {
    pub const ALL: [DeployStage; 11] = [
        DeployStage::Normalize,
        DeployStage::Dockerfile,
        DeployStage::Manifest,
        DeployStage::Materialize,
        DeployStage::Build,
        DeployStage::Tag,
        DeployStage::Push,
        DeployStage::Apply,
        DeployStage::AwaitReady,
        DeployStage::Logs,
        DeployStage::Report,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DeployStage::Normalize => "normalize",
            DeployStage::Dockerfile => "dockerfile",
            DeployStage::Manifest => "manifest",
            DeployStage::Materialize => "materialize",
            DeployStage::Build => "build",
            DeployStage::Tag => "tag",
            DeployStage::Push => "push",
            DeployStage::Apply => "apply",
            DeployStage::AwaitReady => "await_ready",
            DeployStage::Logs => "logs",
            DeployStage::Report => "report",
        }
    }

    /// Whether a failure in this stage stops the run.
    pub fn is_gate(&self) -> bool {
        !matches!(self, DeployStage::Logs | DeployStage::Report)
    }
}

impl fmt::Display for DeployStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
