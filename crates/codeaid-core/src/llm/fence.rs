//! Cleanup of incidental markdown around generated replies.

use std::sync::OnceLock;

use regex::Regex;

fn fence_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:[\w+-]+)?\n?").expect("static pattern"))
}

/// Remove code-fence markers (with optional language tag) and surrounding backticks.
pub fn strip_code_fences(reply: &str) -> String {
    let stripped = fence_marker().replace_all(reply, "");
    stripped.trim().trim_matches('`').trim().to_string()
}

/// The outermost `{...}` span of `text`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
