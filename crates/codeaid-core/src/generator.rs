//! Turning task instructions into structured code artifacts.
//!
//! The text generator is unreliable: replies may be fenced, padded with prose
//! or missing fields. Everything that leaves this module is a validated
//! [`Artifact`] or a `GenerationParse` error.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::domain::{Artifact, CodeAidError, Language, Result, TaskVariant, SCRIPT_ENTRY};
use crate::guard::bounded;
use crate::llm::{extract_json_object, strip_code_fences, TextGenerator};

/// Output contract appended to every generation and repair instruction.
const OUTPUT_CONTRACT: &str = "\
Reply with a single JSON object and nothing else. It must have these fields:\n\
- \"code\": the complete executable program with all comments removed. Avoid infinite loops and unbounded memory use.\n\
- \"language\": the language of that program in lowercase (\"python\" or \"java\").\n\
- \"docker_image\": a Docker Hub image that can run the program. Honour any version the user or the code asks for; otherwise use the latest release.\n\
- \"class_name\": the public class name for Java; for Python the literal word \"output\".";

#[derive(Debug, Deserialize)]
struct RawArtifact {
    code: String,
    language: String,
    docker_image: String,
    #[serde(default)]
    class_name: Option<String>,
}

fn java_identifier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("static pattern"))
}

/// Directive for `task` over `source` written in `language`.
pub fn task_instruction(task: TaskVariant, language: Language, source: &str) -> String {
    let directive = match (task, language) {
        (TaskVariant::BugFix, _) => format!(
            "This {} program has a defect. Correct it so it runs to completion.",
            language
        ),
        (TaskVariant::VersionUpgrade, Language::Java) => "Port this Java program to the Java \
             version the comments or the user ask for. Rework any construct that version does not \
             support and keep the program's output identical. Do not try to infer the version from \
             the code itself."
            .to_string(),
        (TaskVariant::VersionUpgrade, _) => "Port this Python program to the Python version the \
             comments or the user ask for. Rework any construct that version does not support and \
             keep the program's output identical. Do not try to infer the version from the code \
             itself."
            .to_string(),
        (TaskVariant::Translate, Language::Java) => "Rewrite this Java program in Python with the \
             same behaviour, replacing Java-specific constructs with idiomatic Python."
            .to_string(),
        (TaskVariant::Translate, _) => "Rewrite this Python program in Java with the same \
             behaviour, replacing Python-specific constructs with idiomatic Java."
            .to_string(),
        (TaskVariant::Optimize, _) => format!(
            "Make this {} program more efficient in time or memory without changing what it \
             does. Use the comments as hints where helpful.",
            language
        ),
    };
    format!("{}\n\nCode:\n{}\n\n{}", directive, source, OUTPUT_CONTRACT)
}

/// Instruction asking for a fix of `artifact` given the failure it produced.
pub fn repair_instruction(artifact: &Artifact, failure_output: &str) -> String {
    format!(
        "This {} program failed when executed. Fix it.\n\nCode:\n{}\n\nError:\n{}\n\n{}",
        artifact.language, artifact.code, failure_output, OUTPUT_CONTRACT
    )
}

/// Parse a generator reply into an [`Artifact`].
///
/// Code fences are stripped first; if the remainder is not a JSON object on
/// its own, the outermost `{...}` span is tried.
pub fn parse_artifact(reply: &str) -> Result<Artifact> {
    let cleaned = strip_code_fences(reply);
    let raw: RawArtifact = match serde_json::from_str(&cleaned) {
        Ok(raw) => raw,
        Err(first) => extract_json_object(&cleaned)
            .and_then(|span| serde_json::from_str(span).ok())
            .ok_or_else(|| CodeAidError::GenerationParse {
                reason: first.to_string(),
            })?,
    };

    if raw.code.trim().is_empty() {
        return Err(CodeAidError::GenerationParse {
            reason: "field `code` is empty".to_string(),
        });
    }
    if raw.docker_image.trim().is_empty() {
        return Err(CodeAidError::GenerationParse {
            reason: "field `docker_image` is empty".to_string(),
        });
    }

    let language = Language::from_tag(&raw.language);
    let entry = match language {
        Language::Java => {
            let name = raw.class_name.unwrap_or_default().trim().to_string();
            if !java_identifier().is_match(&name) {
                return Err(CodeAidError::GenerationParse {
                    reason: format!("`class_name` {:?} is not a valid Java identifier", name),
                });
            }
            name
        }
        _ => SCRIPT_ENTRY.to_string(),
    };

    Ok(Artifact::new(raw.code, language, raw.docker_image.trim(), entry))
}

/// Produces artifacts from task instructions and failure reports.
pub struct ArtifactGenerator {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl ArtifactGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout_secs: u64) -> Self {
        Self {
            generator,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// First artifact for `task` over `source`.
    pub async fn generate(
        &self,
        task: TaskVariant,
        language: Language,
        source: &str,
        user_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let instruction = task_instruction(task, language, source);
        tracing::debug!(task = %task, language = %language, backend = self.generator.name(), "Generating artifact");
        self.ask(&instruction, user_prompt, cancel).await
    }

    /// Replacement for `artifact`, which failed with `failure_output`.
    pub async fn repair(
        &self,
        artifact: &Artifact,
        failure_output: &str,
        user_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let instruction = repair_instruction(artifact, failure_output);
        tracing::debug!(language = %artifact.language, backend = self.generator.name(), "Requesting repair");
        self.ask(&instruction, user_prompt, cancel).await
    }

    async fn ask(
        &self,
        instruction: &str,
        user_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let reply = bounded(
            "text generation",
            self.timeout,
            cancel,
            self.generator.chat(instruction, user_prompt),
        )
        .await?;
        parse_artifact(&reply)
    }
}
