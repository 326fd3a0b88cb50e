//! Bounded text extraction for store fields

/// Cap `text` at `limit` characters, marking the cut. Store fields holding
/// error messages have no business carrying megabytes of build output.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit).collect();
    format!("{kept} [truncated]")
}

/// Last `limit` characters of `text`, trimmed. Used as the fallback task
/// result when the agent reported nothing through the store.
pub fn tail_snippet(text: &str, limit: usize) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let count = trimmed.chars().count();
    if count <= limit {
        return Some(trimmed.to_string());
    }
    Some(trimmed.chars().skip(count - limit).collect())
}
