/// Collapses all whitespace runs (including CR/LF) to single spaces and
/// trims the ends, producing a transcript-safe single line.
pub fn sanitize_single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncates `text` to at most `max_length` characters, appending `suffix`
/// when anything was cut.
pub fn truncate(text: &str, max_length: usize, suffix: &str) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let keep = max_length.saturating_sub(suffix.chars().count());
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(suffix);
    truncated
}
