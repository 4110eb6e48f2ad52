//! Deterministic memory-grounding answers.
//!
//! Two classes of question are intercepted before any inference call and
//! answered from stored state only, so the model can never fabricate memory
//! claims it cannot support. Resolution is a pure function of the history,
//! the reset marker, and the input text: zero I/O, zero side effects.

use std::sync::OnceLock;

use bridge_core::format_utc_timestamp;
use bridge_ollama::ChatMessage;
use chrono::{DateTime, Utc};
use regex::Regex;

/// Canonical reply when a "before reset" question arrives and no reset
/// marker is stored for the conversation.
pub const NO_RESET_MARKER_REPLY: &str =
    "Not in my stored channel buffer (no reset marker stored for this channel).";

/// Bare targets shorter than this require exact equality instead of
/// substring containment.
const SUBSTRING_MATCH_MIN_CHARS: usize = 3;

fn before_reset_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\bbefore\s+(?:the\s+)?reset\b").expect("static before-reset pattern")
    })
}

fn message_before_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)what\s+was\s+the\s+message\s+before\s+(?:"([^"]*)"|(.+?))[\s?]*$"#)
            .expect("static message-before pattern")
    })
}

/// Attempts to answer `input` directly from stored state.
///
/// Returns `None` when neither recognized question pattern matches (or the
/// extracted target is empty), signaling the caller to proceed to inference.
pub fn resolve_deterministic(
    history: &[ChatMessage],
    last_reset_at: Option<DateTime<Utc>>,
    max_pairs: usize,
    input: &str,
) -> Option<String> {
    if before_reset_pattern().is_match(input) {
        return Some(resolve_before_reset(last_reset_at));
    }
    resolve_message_before(history, max_pairs, input)
}

fn resolve_before_reset(last_reset_at: Option<DateTime<Utc>>) -> String {
    match last_reset_at {
        Some(reset_at) => format!(
            "History cleared at {}; nothing retained.",
            format_utc_timestamp(reset_at)
        ),
        None => NO_RESET_MARKER_REPLY.to_string(),
    }
}

fn resolve_message_before(
    history: &[ChatMessage],
    max_pairs: usize,
    input: &str,
) -> Option<String> {
    let captures = message_before_pattern().captures(input)?;
    let (raw_target, quoted) = match (captures.get(1), captures.get(2)) {
        (Some(quoted_target), _) => (quoted_target.as_str(), true),
        (None, Some(bare_target)) => (bare_target.as_str(), false),
        (None, None) => return None,
    };

    let target = normalize(raw_target);
    if target.is_empty() {
        return None;
    }

    if history.is_empty() {
        return Some("Not in my stored channel buffer (stored messages: 0).".to_string());
    }

    // Quoted targets and very short bare targets match exactly; longer bare
    // targets match by substring containment. Ties resolve to the most
    // recent occurrence.
    let exact = quoted || target.chars().count() < SUBSTRING_MATCH_MIN_CHARS;
    let mut matched_index: Option<usize> = None;
    for (index, turn) in history.iter().enumerate() {
        let content = normalize(&turn.content);
        let hit = if exact {
            content == target
        } else {
            content.contains(&target)
        };
        if hit {
            matched_index = Some(index);
        }
    }

    match matched_index {
        None | Some(0) => Some(format!(
            "Not in my stored channel buffer (stored messages: {}; max: {}).",
            history.len(),
            max_pairs.saturating_mul(2),
        )),
        Some(index) => {
            let predecessor = &history[index - 1];
            let content = if predecessor.content.trim().is_empty() {
                "*(empty message)*".to_string()
            } else {
                predecessor.content.clone()
            };
            Some(format!(
                "The message before \"{}\" was ({}): {}",
                raw_target.trim(),
                predecessor.role.as_str(),
                content,
            ))
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
