//! Splits long model responses into platform-sized chat messages.
//!
//! Chat surfaces enforce a hard per-message character limit (2000 for the
//! reference platform). Splitting prefers line boundaries so code blocks and
//! lists stay readable; a single oversized line is hard-split at the limit.

/// Hard per-message character limit of the reference chat platform.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2000;

/// Placeholder chunk returned for empty input.
pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "*(empty response)*";

/// Splits `text` into chunks of at most `max_length` characters.
///
/// Whole lines (including their trailing newline) are accumulated into a
/// chunk until the next line would overflow, then the chunk is flushed.
/// Concatenating the returned chunks reproduces `text` exactly; empty input
/// yields exactly one placeholder chunk. Never fails.
pub fn split_message(text: &str, max_length: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![EMPTY_RESPONSE_PLACEHOLDER.to_string()];
    }

    let max_length = max_length.max(1);
    if text.chars().count() <= max_length {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split_inclusive('\n') {
        let mut rest = line;
        let mut rest_len = rest.chars().count();

        if current_len + rest_len > max_length {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            while rest_len > max_length {
                let split_at = byte_offset_of_char(rest, max_length);
                chunks.push(rest[..split_at].to_string());
                rest = &rest[split_at..];
                rest_len -= max_length;
            }
        }

        current.push_str(rest);
        current_len += rest_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    if chunks.is_empty() {
        vec![EMPTY_RESPONSE_PLACEHOLDER.to_string()]
    } else {
        chunks
    }
}

fn byte_offset_of_char(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(split_message("hello", 2000), vec!["hello".to_string()]);
    }

    #[test]
    fn empty_input_yields_placeholder() {
        assert_eq!(
            split_message("", 2000),
            vec![EMPTY_RESPONSE_PLACEHOLDER.to_string()]
        );
    }

    #[test]
    fn prefers_line_boundaries() {
        let text = "first line\nsecond line\nthird line\n";
        let chunks = split_message(text, 24);
        assert_eq!(chunks, vec!["first line\nsecond line\n", "third line\n"]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn hard_splits_a_single_oversized_line() {
        let text = "x".repeat(4500);
        let chunks = split_message(&text, 2000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 2000);
        assert_eq!(chunks[1].chars().count(), 2000);
        assert_eq!(chunks[2].chars().count(), 500);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn round_trips_mixed_content() {
        let mut text = String::new();
        for index in 0..200 {
            text.push_str(&format!("line {index} with some padding text\n"));
        }
        text.push_str(&"z".repeat(5000));
        let chunks = split_message(&text, 2000);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 2000));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn respects_multibyte_characters() {
        let text = "é".repeat(30);
        let chunks = split_message(&text, 8);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 8));
        assert_eq!(chunks.concat(), text);
    }
}
