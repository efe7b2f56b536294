use std::sync::LazyLock;

use regex::Regex;

use super::message::{Message, MessageType};

pub const DEFAULT_CONVERSATION_TITLE: &str = "محادثة جديدة";
pub const TITLE_MAX_CHARS: usize = 50;
pub const PREVIEW_MAX_CHARS: usize = 100;

const ELLIPSIS: &str = "...";
const WORDS_PER_MINUTE: usize = 200;

static CODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"```[\s\S]*```",
        r"`[^`\n]+`",
        r"function\s+\w+\s*\(",
        r"class\s+\w+",
        r"import\s+.*from",
        r"export\s+(default\s+)?",
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

static LIST_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*•]|\d+[.)])\s+\S").ok());

static CODE_FENCE_LANGUAGE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"```(\w+)").ok());

/// Shortens `text` to at most `max_chars` characters, the ellipsis included.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    if max_chars < ELLIPSIS.len() {
        return text.chars().take(max_chars).collect();
    }

    let keep = max_chars - ELLIPSIS.len();
    let mut truncated = text.chars().take(keep).collect::<String>();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Title derived from a user message: the first `max_chars` characters, with
/// `...` appended when anything was cut.
pub fn title_from_content(content: &str, max_chars: usize) -> String {
    let content = content.trim();
    if content.chars().count() <= max_chars {
        return content.to_string();
    }

    let mut title = content.chars().take(max_chars).collect::<String>();
    title.push_str(ELLIPSIS);
    title
}

pub fn conversation_preview(messages: &[Message]) -> String {
    match messages.last() {
        Some(message) => truncate_text(&message.content, PREVIEW_MAX_CHARS),
        None => DEFAULT_CONVERSATION_TITLE.to_string(),
    }
}

pub fn detect_code(content: &str) -> bool {
    CODE_PATTERNS.iter().any(|pattern| pattern.is_match(content))
}

pub fn detect_list(content: &str) -> bool {
    LIST_LINE
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(content))
}

/// Info string of the first fenced code block, e.g. `rust` for "```rust".
pub fn extract_code_language(content: &str) -> Option<String> {
    CODE_FENCE_LANGUAGE
        .as_ref()?
        .captures(content)
        .and_then(|captures| captures.get(1))
        .map(|language| language.as_str().to_string())
}

pub fn infer_message_type(content: &str) -> MessageType {
    if detect_code(content) {
        MessageType::Code
    } else if detect_list(content) {
        MessageType::List
    } else {
        MessageType::Text
    }
}

/// Minutes needed to read `content` at 200 words per minute, rounded up.
pub fn reading_time_minutes(content: &str) -> usize {
    content
        .split_whitespace()
        .count()
        .div_ceil(WORDS_PER_MINUTE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_text("مرحبا", 5), "مرحبا");
        assert_eq!(truncate_text("مرحبا بالعالم", 8), "مرحبا...");
        assert_eq!(truncate_text("abcd", 3), "...");
    }

    #[test]
    fn truncate_never_exceeds_the_limit() {
        assert_eq!(truncate_text("abc", 2), "ab");
        assert_eq!(truncate_text("مرحبا", 1), "م");
        assert_eq!(truncate_text("abc", 0), "");
        for max in 0..8 {
            assert!(truncate_text("مرحبا بالعالم", max).chars().count() <= max);
        }
    }

    #[test]
    fn title_keeps_fifty_chars_then_ellipsis() {
        assert_eq!(title_from_content("  hello  ", TITLE_MAX_CHARS), "hello");

        let long = "ا".repeat(60);
        let title = title_from_content(&long, TITLE_MAX_CHARS);
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));

        let exact = "b".repeat(50);
        assert_eq!(title_from_content(&exact, TITLE_MAX_CHARS), exact);
    }

    #[test]
    fn preview_falls_back_to_default_title() {
        assert_eq!(conversation_preview(&[]), DEFAULT_CONVERSATION_TITLE);
    }

    #[test]
    fn code_and_list_detection() {
        assert!(detect_code("use `cargo build` here"));
        assert!(detect_code("```rust\nfn main() {}\n```"));
        assert!(!detect_code("plain words only"));

        assert!(detect_list("steps:\n1. install\n2. run"));
        assert!(detect_list("- one\n- two"));
        assert!(!detect_list("no bullets - inline dash"));

        assert_eq!(infer_message_type("```py\nx = 1\n```"), MessageType::Code);
        assert_eq!(infer_message_type("* item"), MessageType::List);
        assert_eq!(infer_message_type("مرحبا"), MessageType::Text);
    }

    #[test]
    fn fence_language_is_extracted() {
        assert_eq!(
            extract_code_language("intro\n```javascript\nconsole.log(1)\n```").as_deref(),
            Some("javascript")
        );
        assert_eq!(extract_code_language("```\nraw\n```"), None);
    }

    #[test]
    fn reading_time_rounds_up() {
        assert_eq!(reading_time_minutes(""), 0);
        assert_eq!(reading_time_minutes("one two"), 1);
        assert_eq!(reading_time_minutes(&"w ".repeat(201)), 2);
    }
}
