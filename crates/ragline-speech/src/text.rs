//! Preparing answer text for speech.

use std::sync::LazyLock;

use regex::Regex;

// =============================================================================
// Compiled regex set
// =============================================================================

struct MarkdownPatterns {
    link: Regex,
    code_fence: Regex,
    heading: Regex,
    bullet: Regex,
    emphasis: Regex,
    whitespace: Regex,
}

static MARKDOWN: LazyLock<MarkdownPatterns> = LazyLock::new(|| MarkdownPatterns {
    link: Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("Invalid link regex"),
    code_fence: Regex::new(r"```[a-zA-Z0-9_-]*").expect("Invalid code fence regex"),
    heading: Regex::new(r"(?m)^\s{0,3}#{1,6}\s+").expect("Invalid heading regex"),
    bullet: Regex::new(r"(?m)^\s*(?:[-*+]|\d+\.)\s+").expect("Invalid bullet regex"),
    emphasis: Regex::new(r"[*_`~]+").expect("Invalid emphasis regex"),
    whitespace: Regex::new(r"\s+").expect("Invalid whitespace regex"),
});

/// Strip markdown markers, collapse whitespace, and cut to `max_chars`
/// characters on a word boundary.
pub fn prepare_for_speech(text: &str, max_chars: usize) -> String {
    let p = &*MARKDOWN;
    let text = p.link.replace_all(text, "$1");
    let text = p.code_fence.replace_all(&text, " ");
    let text = p.heading.replace_all(&text, "");
    let text = p.bullet.replace_all(&text, "");
    let text = p.emphasis.replace_all(&text, "");
    let text = p.whitespace.replace_all(&text, " ");
    truncate_on_word(text.trim(), max_chars)
}

fn truncate_on_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut chars = text.chars();
    let cut: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some_and(char::is_whitespace) {
        return cut.trim_end().to_string();
    }
    match cut.rfind(' ') {
        Some(space) if space > 0 => cut[..space].trim_end().to_string(),
        _ => cut,
    }
}
