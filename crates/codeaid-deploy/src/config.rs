//! Deployment configuration.

use std::path::PathBuf;

use codeaid_core::env;
use serde::{Deserialize, Serialize};

/// Registry path images are pushed under: `<host>/<project>/<repository>/<service>:latest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryTarget {
    /// e.g. `us-central1-docker.pkg.dev`.
    pub host: String,
    pub project: String,
    pub repository: String,
}

impl Default for RegistryTarget {
    fn default() -> Self {
        Self {
            host: env::var_or("GCP_ARTIFACT_REGISTRY", ""),
            project: env::var_or("GCP_PROJECT_ID", ""),
            repository: env::var_or("GCP_ARTIFACT_REGISTRY_REPO", ""),
        }
    }
}

impl RegistryTarget {
    pub fn new(
        host: impl Into<String>,
        project: impl Into<String>,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            project: project.into(),
            repository: repository.into(),
        }
    }

    /// Fully qualified reference for `service`; empty segments are skipped.
    pub fn image_reference(&self, service: &str) -> String {
        let mut parts: Vec<&str> = [
            self.host.as_str(),
            self.project.as_str(),
            self.repository.as_str(),
        ]
        .into_iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect();
        parts.push(service);
        format!("{}:latest", parts.join("/"))
    }

    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty()
    }
}

/// Settings for one deployment pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    pub registry: RegistryTarget,
    /// Parent of the per-service working directories.
    pub deploy_root: PathBuf,
    pub docker_bin: String,
    pub kubectl_bin: String,
    pub namespace: Option<String>,
    /// Limit for tag, push, apply, list and logs commands.
    pub command_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub generator_timeout_secs: u64,
    pub poll_attempts: u32,
    pub poll_delay_secs: u64,
    /// Characters of each command output kept in the operation log.
    pub output_cap: usize,
    /// Fail when the workload is observed but not Running/Completed.
    pub require_healthy: bool,
    /// Append a generated prose summary to the report.
    pub narrate_report: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            registry: RegistryTarget::default(),
            deploy_root: PathBuf::from(env::var_or("CODEAID_DEPLOY_ROOT", "tmp")),
            docker_bin: env::var_or("CODEAID_DOCKER_BIN", "docker"),
            kubectl_bin: env::var_or("CODEAID_KUBECTL_BIN", "kubectl"),
            namespace: env::optional("CODEAID_K8S_NAMESPACE"),
            command_timeout_secs: 120,
            build_timeout_secs: 600,
            generator_timeout_secs: env::parse_or("CODEAID_LLM_TIMEOUT_SECS", 120),
            poll_attempts: 10,
            poll_delay_secs: 3,
            output_cap: 2000,
            require_healthy: false,
            narrate_report: false,
        }
    }
}

impl DeployConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn with_deploy_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.deploy_root = root.into();
        self
    }

    pub fn with_registry(mut self, registry: RegistryTarget) -> Self {
        self.registry = registry;
        self
    }

    pub fn service_dir(&self, service: &str) -> PathBuf {
        self.deploy_root.join(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_reference_layout() {
        let registry = RegistryTarget::new("us-docker.pkg.dev", "acme", "apps");
        assert_eq!(
            registry.image_reference("codeaidapter-1"),
            "us-docker.pkg.dev/acme/apps/codeaidapter-1:latest"
        );
    }

    #[test]
    fn test_image_reference_skips_empty_segments() {
        let registry = RegistryTarget::new("localhost:5000/", "", "apps");
        assert_eq!(
            registry.image_reference("svc"),
            "localhost:5000/apps/svc:latest"
        );
        assert!(registry.is_configured());
        assert!(!RegistryTarget::new("", "", "").is_configured());
    }

    #[test]
    fn test_defaults() {
        let cfg = DeployConfig::default().with_deploy_root("/tmp/deploys");
        assert_eq!(cfg.poll_attempts, 10);
        assert_eq!(cfg.poll_delay_secs, 3);
        assert_eq!(cfg.output_cap, 2000);
        assert!(!cfg.require_healthy);
        assert_eq!(
            cfg.service_dir("svc"),
            PathBuf::from("/tmp/deploys/svc")
        );
    }
}
