//! Inbound request and task selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A single inbound request: `{prompt, file?, filename?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRequest {
    /// Free-text instruction from the user.
    #[serde(default)]
    pub prompt: String,

    /// Source text, if any.
    #[serde(default)]
    pub file: Option<String>,

    /// Original file name of `file`, if known.
    #[serde(default)]
    pub filename: Option<String>,
}

impl CodeRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            file: None,
            filename: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.file = Some(source.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Source text, treating an empty or whitespace-only file as absent.
    pub fn source(&self) -> Option<&str> {
        self.file.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// The transformation requested on the supplied code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskVariant {
    /// Move the code to another version of the same language.
    VersionUpgrade,
    /// Translate between Python and Java.
    Translate,
    /// Improve time or space complexity without changing behaviour.
    Optimize,
    /// Make failing code run.
    BugFix,
}

impl TaskVariant {
    pub const ALL: [TaskVariant; 4] = [
        TaskVariant::VersionUpgrade,
        TaskVariant::Translate,
        TaskVariant::Optimize,
        TaskVariant::BugFix,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TaskVariant::VersionUpgrade => "version-upgrade",
            TaskVariant::Translate => "translate",
            TaskVariant::Optimize => "optimize",
            TaskVariant::BugFix => "bug-fix",
        }
    }

    /// Legacy task code (`A1`, `A2`, `A3`, `B`).
    pub fn code(&self) -> &'static str {
        match self {
            TaskVariant::VersionUpgrade => "A1",
            TaskVariant::Translate => "A2",
            TaskVariant::Optimize => "A3",
            TaskVariant::BugFix => "B",
        }
    }
}

impl fmt::Display for TaskVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "version-upgrade" | "upgrade" | "a1" => Ok(TaskVariant::VersionUpgrade),
            "translate" | "translation" | "a2" => Ok(TaskVariant::Translate),
            "optimize" | "optimise" | "a3" => Ok(TaskVariant::Optimize),
            "bug-fix" | "bugfix" | "fix" | "b" => Ok(TaskVariant::BugFix),
            _ => Err(format!(
                "unknown task '{}' (expected one of: version-upgrade, translate, optimize, bug-fix)",
                s
            )),
        }
    }
}
