//! Generated code artifacts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Entry identifier used for scripted languages.
pub const SCRIPT_ENTRY: &str = "output";

/// Languages the sandbox knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    Unknown,
}

impl Language {
    /// Parse a language tag; anything unrecognised is `Unknown`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Language::Python,
            "java" => Language::Java,
            _ => Language::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
            Language::Unknown => "unknown",
        }
    }

    /// Conventional source file name when nothing better is known.
    pub fn default_file_name(&self) -> &'static str {
        match self {
            Language::Python => "main.py",
            Language::Java => "Main.java",
            Language::Unknown => "main.txt",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generated source code plus what is needed to run it.
///
/// An artifact is never patched: each repair produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub code: String,
    pub language: Language,
    /// Container image able to run `code`.
    pub image: String,
    /// Public class name for Java, [`SCRIPT_ENTRY`] for scripts.
    pub entry: String,
}

impl Artifact {
    pub fn new(
        code: impl Into<String>,
        language: Language,
        image: impl Into<String>,
        entry: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            language,
            image: image.into(),
            entry: entry.into(),
        }
    }

    /// File name the source is written under, inside the sandbox and in responses.
    pub fn file_name(&self) -> String {
        match self.language {
            Language::Java => format!("{}.java", self.entry),
            _ => format!("{}.py", SCRIPT_ENTRY),
        }
    }

    /// Image reference with an explicit tag (`:latest` when none was given).
    pub fn image_reference(&self) -> String {
        normalize_image_reference(&self.image)
    }
}

/// Append `:latest` to an image reference that carries neither a tag nor a digest.
pub fn normalize_image_reference(image: &str) -> String {
    let image = image.trim();
    if image.contains('@') {
        return image.to_string();
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}
