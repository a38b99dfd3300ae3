//! Structural language detection over user-supplied source.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::Language;

fn java_markers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"class\s+\w+|public\s+static\s+void\s+main").expect("static pattern")
    })
}

fn python_markers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"def\s+\w+|import\s+|print\s*\(").expect("static pattern"))
}

/// Guess the language of `source`.
///
/// Java markers win over Python markers, so a Java file that prints is still Java.
pub fn detect_language(source: &str) -> Language {
    if java_markers().is_match(source) {
        Language::Java
    } else if python_markers().is_match(source) {
        Language::Python
    } else {
        Language::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_python() {
        assert_eq!(detect_language("print('hi')"), Language::Python);
        assert_eq!(detect_language("import os\nos.getcwd()"), Language::Python);
        assert_eq!(detect_language("def add(a, b):\n    return a + b"), Language::Python);
    }

    #[test]
    fn test_detects_java() {
        let src = "public class Hello {\n  public static void main(String[] a) {}\n}";
        assert_eq!(detect_language(src), Language::Java);
    }

    #[test]
    fn test_java_wins_over_python_markers() {
        let src = "import java.util.*;\nclass Box { void print() {} }";
        assert_eq!(detect_language(src), Language::Java);
    }

    #[test]
    fn test_unknown_input() {
        assert_eq!(detect_language(""), Language::Unknown);
        assert_eq!(detect_language("SELECT * FROM users;"), Language::Unknown);
        assert_eq!(detect_language("fn main() {}"), Language::Unknown);
    }
}
