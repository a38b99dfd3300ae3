//! Build-file and manifest generation.

use std::sync::Arc;
use std::time::Duration;

use codeaid_core::llm::strip_code_fences;
use codeaid_core::{bounded, CodeAidError, Language, Result, TextGenerator};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RegistryTarget;

/// File name of the generated manifest, inside the service directory and in responses.
pub const MANIFEST_FILE: &str = "config.yaml";

/// File name of the generated build file.
pub const DOCKERFILE: &str = "Dockerfile";

const DOCKERFILE_TEMPLATE: &str = "\
FROM <image>
WORKDIR /app
COPY <file> .
RUN <command> # only if needed
CMD <command>";

/// Everything needed to build and roll out one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// Globally unique, also the workload name.
    pub service_name: String,
    /// Local build tag, `<service>:latest`.
    pub local_tag: String,
    /// Fully qualified registry reference.
    pub image_ref: String,
    pub dockerfile: String,
    pub manifest: String,
    pub source_file_name: String,
    /// Normalized source written next to the Dockerfile.
    pub source: String,
}

/// Fresh service identity, `codeaidapter-<uuid>`.
pub fn new_service_name() -> String {
    format!("codeaidapter-{}", Uuid::new_v4())
}

/// Base name of `filename`, or the language default when absent or unusable.
pub fn source_file_name(filename: Option<&str>, language: Language) -> String {
    filename
        .map(|f| f.rsplit(['/', '\\']).next().unwrap_or(f).trim())
        .filter(|f| !f.is_empty() && *f != "." && *f != "..")
        .map(str::to_string)
        .unwrap_or_else(|| match language {
            Language::Java => Language::Java.default_file_name().to_string(),
            _ => Language::Python.default_file_name().to_string(),
        })
}

/// Generates the build file and the manifest through the text generator.
pub struct DeploymentSpecGenerator {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl DeploymentSpecGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout_secs: u64) -> Self {
        Self {
            generator,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn ask(
        &self,
        what: &str,
        instruction: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let reply = bounded(
            what,
            self.timeout,
            cancel,
            self.generator.chat(instruction, user),
        )
        .await
        .map_err(|e| match e {
            CodeAidError::Generator(msg) => CodeAidError::SpecGeneration(format!("{}: {}", what, msg)),
            other => other,
        })?;

        let cleaned = strip_code_fences(&reply);
        if cleaned.is_empty() {
            return Err(CodeAidError::SpecGeneration(format!("{} came back empty", what)));
        }
        Ok(cleaned)
    }

    /// Source with prose, markup and comments removed.
    pub async fn normalize_source(
        &self,
        file_name: &str,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let instruction = "Return only the program source from the file below. \
            Drop comments and any surrounding explanation. Do not use Markdown.";
        let user = format!("File: {}\nCode content:\n{}", file_name, source);
        self.ask("source normalization", instruction, &user, cancel)
            .await
    }

    pub async fn dockerfile(
        &self,
        file_name: &str,
        source: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let instruction = format!(
            "Write a Dockerfile that runs the program below. Reply with the Dockerfile only: \
             no comments, no explanation, no Markdown. Follow this shape:\n{}",
            DOCKERFILE_TEMPLATE
        );
        let user = format!(
            "File: {}\nCode content:\n{}\n--------------------------------\n{}",
            file_name, source, prompt
        );
        self.ask("Dockerfile generation", &instruction, &user, cancel)
            .await
    }

    pub async fn manifest(
        &self,
        image_ref: &str,
        dockerfile: &str,
        service_name: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let instruction = "Write a Kubernetes manifest (config.yaml) that runs the pushed image \
            below as a workload named after the pod name given. Reply with the YAML only: \
            no comments, no explanation, no Markdown.";
        let user = format!(
            "Docker image tag: {}\nDockerfile content:\n{}\nPod name: {}\n--------------------------------\n{}",
            image_ref, dockerfile, service_name, prompt
        );
        self.ask("manifest generation", instruction, &user, cancel)
            .await
    }

    /// Short prose summary of a finished report.
    pub async fn narrate(&self, report: &str, cancel: &CancellationToken) -> Result<String> {
        let instruction = "Summarise this deployment report for the user in a few sentences: \
            what was built, whether it is running, and the first error if any.";
        self.ask("report narration", instruction, report, cancel)
            .await
    }

    /// Normalize, then generate build file and manifest for a fresh service name.
    pub async fn generate(
        &self,
        source: &str,
        filename: Option<&str>,
        language: Language,
        prompt: &str,
        registry: &RegistryTarget,
        cancel: &CancellationToken,
    ) -> Result<DeploymentSpec> {
        let service_name = new_service_name();
        self.generate_for(&service_name, source, filename, language, prompt, registry, cancel)
            .await
    }

    /// As [`generate`](Self::generate), for a caller-chosen service name.
    #[allow(clippy::too_many_arguments)]
    pub async fn generate_for(
        &self,
        service_name: &str,
        source: &str,
        filename: Option<&str>,
        language: Language,
        prompt: &str,
        registry: &RegistryTarget,
        cancel: &CancellationToken,
    ) -> Result<DeploymentSpec> {
        let source_file_name = source_file_name(filename, language);
        let image_ref = registry.image_reference(service_name);

        let source = self
            .normalize_source(&source_file_name, source, cancel)
            .await?;
        let dockerfile = self
            .dockerfile(&source_file_name, &source, prompt, cancel)
            .await?;
        let manifest = self
            .manifest(&image_ref, &dockerfile, service_name, prompt, cancel)
            .await?;

        Ok(DeploymentSpec {
            service_name: service_name.to_string(),
            local_tag: format!("{}:latest", service_name),
            image_ref,
            dockerfile,
            manifest,
            source_file_name,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeaid_core::fakes::ScriptedGenerator;

    #[test]
    fn test_service_names_are_unique() {
        let a = new_service_name();
        let b = new_service_name();
        assert!(a.starts_with("codeaidapter-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_source_file_name() {
        assert_eq!(source_file_name(Some("app/server.py"), Language::Python), "server.py");
        assert_eq!(source_file_name(Some("C:\\src\\Main.java"), Language::Java), "Main.java");
        assert_eq!(source_file_name(None, Language::Java), "Main.java");
        assert_eq!(source_file_name(Some(".."), Language::Python), "main.py");
        assert_eq!(source_file_name(Some(""), Language::Unknown), "main.py");
    }

    #[tokio::test]
    async fn test_generate_chains_three_calls() {
        let text = Arc::new(ScriptedGenerator::new([
            "print('hello')",
            "```dockerfile\nFROM python:3.12\nCOPY app.py .\nCMD [\"python\", \"app.py\"]\n```",
            "apiVersion: v1\nkind: Pod",
        ]));
        let generator = DeploymentSpecGenerator::new(text.clone(), 5);
        let registry = RegistryTarget::new("reg.example", "proj", "repo");

        let spec = generator
            .generate_for(
                "codeaidapter-test",
                "# say hi\nprint('hello')",
                Some("app.py"),
                Language::Python,
                "expose nothing",
                &registry,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(spec.image_ref, "reg.example/proj/repo/codeaidapter-test:latest");
        assert_eq!(spec.local_tag, "codeaidapter-test:latest");
        assert!(spec.dockerfile.starts_with("FROM python:3.12"));
        assert_eq!(spec.source, "print('hello')");
        assert_eq!(spec.source_file_name, "app.py");

        let calls = text.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[2].1.contains("reg.example/proj/repo/codeaidapter-test:latest"));
        assert!(calls[2].1.contains("Pod name: codeaidapter-test"));
        assert!(calls[1].1.contains("expose nothing"));
    }

    #[tokio::test]
    async fn test_generator_failure_is_spec_generation_error() {
        let text = Arc::new(ScriptedGenerator::new(["print(1)"]));
        text.push_error("rate limited");
        let generator = DeploymentSpecGenerator::new(text, 5);
        let err = generator
            .generate(
                "print(1)",
                None,
                Language::Python,
                "",
                &RegistryTarget::new("r", "p", "q"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CodeAidError::SpecGeneration(msg) if msg.contains("rate limited")));
    }

    #[tokio::test]
    async fn test_empty_reply_is_rejected() {
        let text = Arc::new(ScriptedGenerator::new(["```\n```"]));
        let generator = DeploymentSpecGenerator::new(text, 5);
        let err = generator
            .normalize_source("a.py", "print(1)", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CodeAidError::SpecGeneration(_)));
    }
}
