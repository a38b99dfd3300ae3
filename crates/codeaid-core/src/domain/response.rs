//! Terminal responses and their two outbound wire shapes.

use serde::{Deserialize, Serialize};

use super::artifact::Artifact;

/// Final result of a repair or deployment run.
///
/// Exactly one of `success_msg` / `error_msg` is populated; the constructors
/// are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeResponse {
    pub file: String,
    pub filename: String,
    success_msg: Option<String>,
    error_msg: Option<String>,
    pub status: bool,
}

impl CodeResponse {
    pub fn success(
        file: impl Into<String>,
        filename: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            filename: filename.into(),
            success_msg: Some(message.into()),
            error_msg: None,
            status: true,
        }
    }

    pub fn failure(
        file: impl Into<String>,
        filename: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            filename: filename.into(),
            success_msg: None,
            error_msg: Some(message.into()),
            status: false,
        }
    }

    /// Failure with no artifact to return.
    pub fn bare_failure(message: impl Into<String>) -> Self {
        Self::failure(String::new(), String::new(), message)
    }

    pub fn from_artifact(artifact: &Artifact, succeeded: bool, message: impl Into<String>) -> Self {
        if succeeded {
            Self::success(artifact.code.clone(), artifact.file_name(), message)
        } else {
            Self::failure(artifact.code.clone(), artifact.file_name(), message)
        }
    }

    pub fn success_msg(&self) -> Option<&str> {
        self.success_msg.as_deref()
    }

    pub fn error_msg(&self) -> Option<&str> {
        self.error_msg.as_deref()
    }

    /// Whichever message is populated.
    pub fn message(&self) -> &str {
        self.success_msg
            .as_deref()
            .or(self.error_msg.as_deref())
            .unwrap_or_default()
    }

    /// `{file, filename, message}` body returned on the generate/repair path.
    pub fn to_body(&self) -> GenerationBody {
        GenerationBody {
            file: self.file.clone(),
            filename: self.filename.clone(),
            message: self.message().to_string(),
        }
    }
}

/// Outbound body of the generate/repair path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationBody {
    pub file: String,
    pub filename: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Success,
    Error,
}

/// `{status, message, data}` body of the classification-only path.
///
/// This shape differs from [`GenerationBody`]; both are kept as they are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
    pub status: EnvelopeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiEnvelope {
    pub fn success(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            status: EnvelopeStatus::Success,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: EnvelopeStatus::Error,
            message: message.into(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::{Language, SCRIPT_ENTRY};

    #[test]
    fn test_success_and_error_are_exclusive() {
        let ok = CodeResponse::success("code", "output.py", "hi");
        assert!(ok.status);
        assert_eq!(ok.success_msg(), Some("hi"));
        assert!(ok.error_msg().is_none());

        let err = CodeResponse::failure("code", "output.py", "boom");
        assert!(!err.status);
        assert!(err.success_msg().is_none());
        assert_eq!(err.error_msg(), Some("boom"));
    }

    #[test]
    fn test_from_artifact_derives_file_name() {
        let artifact = Artifact::new("class Main {}", Language::Java, "openjdk", "Main");
        let response = CodeResponse::from_artifact(&artifact, false, "error: ';' expected");
        assert_eq!(response.filename, "Main.java");
        assert_eq!(response.file, "class Main {}");
        assert_eq!(response.message(), "error: ';' expected");

        let script = Artifact::new("print(1)", Language::Python, "python", SCRIPT_ENTRY);
        assert_eq!(
            CodeResponse::from_artifact(&script, true, "1\n").filename,
            "output.py"
        );
    }

    #[test]
    fn test_generation_body_shape() {
        let body = CodeResponse::success("print('hi')", "output.py", "hi\n").to_body();
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["file"], "print('hi')");
        assert_eq!(value["filename"], "output.py");
        assert_eq!(value["message"], "hi\n");
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_envelope_shape() {
        let env = ApiEnvelope::success("Analysis completed", serde_json::json!({"route": "repair"}));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["data"]["route"], "repair");

        let value = serde_json::to_value(ApiEnvelope::error("bad request")).unwrap();
        assert_eq!(value["status"], "error");
        assert!(value.get("data").is_none());
    }
}
