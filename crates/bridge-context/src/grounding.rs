//! Builds the system-role grounding instruction prepended to every
//! inference call.
//!
//! The instruction pins the model to the stored buffer and reuses the exact
//! canonical phrasings of the deterministic resolver, so a borderline
//! question the resolver did not intercept still gets a consistent answer.

use bridge_core::format_utc_timestamp;
use chrono::{DateTime, Utc};

use crate::resolver::NO_RESET_MARKER_REPLY;

pub fn build_grounding_instruction(
    max_pairs: usize,
    stored_turns: usize,
    last_reset_at: Option<DateTime<Utc>>,
) -> String {
    let max_messages = max_pairs.saturating_mul(2);
    let reset_marker = last_reset_at
        .map(format_utc_timestamp)
        .unwrap_or_else(|| "none".to_string());

    let mut lines = vec![
        "You are a chat assistant with a bounded, channel-scoped conversation memory."
            .to_string(),
        format!(
            "Context window: {max_pairs} user+assistant pairs ({max_messages} messages). \
             Messages currently stored for this channel: {stored_turns}."
        ),
        format!("Most recent history reset for this channel: {reset_marker}."),
        "Never claim to remember anything that is not in the stored message buffer \
         described above."
            .to_string(),
        "Do not emit generic disclaimers about being a language model.".to_string(),
        format!(
            "If asked about a message that is not in the buffer, reply exactly: \
             \"Not in my stored channel buffer (stored messages: {stored_turns}; \
             max: {max_messages}).\""
        ),
    ];

    match last_reset_at {
        Some(reset_at) => lines.push(format!(
            "If asked what happened before the reset, reply exactly: \
             \"History cleared at {}; nothing retained.\"",
            format_utc_timestamp(reset_at)
        )),
        None => lines.push(format!(
            "If asked what happened before a reset, reply exactly: \
             \"{NO_RESET_MARKER_REPLY}\""
        )),
    }

    lines.join("\n")
}
