//! Extraction of structured content from raw LLM responses.
//!
//! Models wrap their answers in markdown code fences, prepend explanations,
//! or emit several fenced blocks; this module recovers the useful payload:
//! fenced code blocks (preferring the last one) and JSON values found by a
//! string-aware balanced scan.

use regex::Regex;
use serde_json::Value;

/// Extracts the contents of the last fenced code block tagged with `lang`.
///
/// Models sometimes emit an explanation block before the final code block,
/// so when several blocks are present the last one wins.
pub fn last_fenced_block(content: &str, lang: &str) -> Option<String> {
    let pattern = format!(r"(?s)```{}\s*\n(.*?)```", regex::escape(lang));
    let re = Regex::new(&pattern).ok()?;
    re.captures_iter(content)
        .last()
        .map(|c| c[1].trim_end().to_string())
}

/// Extracts the contents of the last generic (untagged) fenced block.
pub fn last_generic_block(content: &str) -> Option<String> {
    let re = Regex::new(r"(?s)```[a-zA-Z0-9_-]*\s*\n(.*?)```").ok()?;
    re.captures_iter(content)
        .last()
        .map(|c| c[1].trim_end().to_string())
}

/// Removes decorative fence lines from a response.
///
/// Lines that start with ``` are dropped wholesale; everything else is kept.
/// This mirrors how chat models decorate otherwise-plain payloads.
pub fn strip_code_fences(content: &str) -> String {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Best-effort extraction of a JSON value from an LLM response.
///
/// Tries, in order:
/// 1. the trimmed content parsed directly;
/// 2. a ```json fenced block;
/// 3. the fence-stripped content;
/// 4. the first balanced `{...}` substring;
/// 5. the first balanced `[...]` substring.
///
/// Returns `None` when nothing parses; never errors.
pub fn extract_json_value(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(block) = last_fenced_block(trimmed, "json") {
        if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
            return Some(value);
        }
    }

    let stripped = strip_code_fences(trimmed);
    if let Ok(value) = serde_json::from_str::<Value>(&stripped) {
        return Some(value);
    }

    if let Some(start) = stripped.find('{') {
        if let Some(end) = find_balanced_end(&stripped[start..], '{', '}') {
            let candidate = &stripped[start..=start + end];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
    }

    if let Some(start) = stripped.find('[') {
        if let Some(end) = find_balanced_end(&stripped[start..], '[', ']') {
            let candidate = &stripped[start..=start + end];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
    }

    None
}

/// Finds the byte offset of the delimiter closing the one that opens `s`.
///
/// Tracks string literals and escapes so that braces inside JSON strings do
/// not affect the depth count. Returns `None` if `s` does not start with
/// `open` or the structure never closes.
fn find_balanced_end(s: &str, open: char, close: char) -> Option<usize> {
    if !s.starts_with(open) {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}
