//! Sandbox configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::env;

/// Limits and locations for sandboxed artifact execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxConfig {
    /// Container CLI binary.
    pub docker_bin: String,
    /// Wall-clock limit for one artifact run.
    pub timeout_secs: u64,
    /// Limit for auxiliary runtime commands (rm, rmi, images).
    pub command_timeout_secs: u64,
    /// `--memory` value passed to the runtime.
    pub memory: String,
    /// `--cpus` value passed to the runtime.
    pub cpus: f64,
    /// `--network` value passed to the runtime.
    pub network: String,
    /// Parent of the per-run scratch directories.
    pub work_root: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_bin: env::var_or("CODEAID_DOCKER_BIN", "docker"),
            timeout_secs: env::parse_or("CODEAID_SANDBOX_TIMEOUT_SECS", 60),
            command_timeout_secs: 120,
            memory: env::var_or("CODEAID_SANDBOX_MEMORY", "512m"),
            cpus: env::parse_or("CODEAID_SANDBOX_CPUS", 1.0),
            network: env::var_or("CODEAID_SANDBOX_NETWORK", "none"),
            work_root: env::optional("CODEAID_WORK_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
        }
    }
}

impl SandboxConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = root.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_override_fields() {
        let cfg = SandboxConfig::default()
            .with_work_root("/tmp/codeaid-test")
            .with_timeout_secs(5);
        assert_eq!(cfg.work_root, PathBuf::from("/tmp/codeaid-test"));
        assert_eq!(cfg.timeout_secs, 5);
    }

    #[test]
    fn test_serde_roundtrip() {
        let cfg = SandboxConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SandboxConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
