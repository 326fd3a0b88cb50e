//! Best-effort extraction of JSON objects from free-form model output
//!
//! Agents and synthesis calls are asked to end their output with a fenced
//! JSON block, but they pad it with prose, drop the fence, or emit several
//! blocks. Extraction is layered: fenced blocks first, then a scan for
//! balanced top-level objects anywhere in the text. Callers fall back to
//! defaults when nothing parses; nothing here returns an error.

use serde_json::Value;

/// Fenced code blocks in order of appearance, keeping only untagged blocks
/// and blocks tagged `json`.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut idx = 0;
    while let Some(open) = text[idx..].find("```") {
        let tag_start = idx + open + 3;
        let Some(newline) = text[tag_start..].find('\n') else {
            break;
        };
        let body_start = tag_start + newline + 1;
        let Some(close) = text[body_start..].find("```") else {
            break;
        };
        let tag = text[tag_start..tag_start + newline].trim();
        if tag.is_empty() || tag.eq_ignore_ascii_case("json") {
            blocks.push(&text[body_start..body_start + close]);
        }
        idx = body_start + close + 3;
    }
    blocks
}

/// Byte spans of balanced top-level `{...}` regions, respecting JSON string
/// literals and escapes. Prose braces produce spans that simply fail to
/// parse later.
fn balanced_object_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, byte) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            spans.push((s, i + 1));
                        }
                    }
                }
            }
            _ => {}
        }
    }
    spans
}

fn parse_object(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Value>(candidate.trim())
        .ok()
        .filter(Value::is_object)
}

/// Extract a JSON object from model output: the last fenced block that
/// parses, otherwise the last balanced object anywhere in the text.
pub fn extract_object(text: &str) -> Option<Value> {
    for block in fenced_blocks(text).into_iter().rev() {
        if let Some(value) = parse_object(block) {
            return Some(value);
        }
    }
    balanced_object_spans(text)
        .into_iter()
        .rev()
        .find_map(|(start, end)| parse_object(&text[start..end]))
}

/// Like [`extract_object`], but only accepts objects carrying at least one
/// of the expected keys. Used when the interesting block is buried among
/// other JSON the agent happened to print.
pub fn last_object_with_keys(text: &str, keys: &[&str]) -> Option<Value> {
    let has_key = |value: &Value| {
        value
            .as_object()
            .is_some_and(|map| keys.iter().any(|key| map.contains_key(*key)))
    };

    for block in fenced_blocks(text).into_iter().rev() {
        if let Some(value) = parse_object(block).filter(has_key) {
            return Some(value);
        }
    }
    balanced_object_spans(text)
        .into_iter()
        .rev()
        .find_map(|(start, end)| parse_object(&text[start..end]).filter(has_key))
}
