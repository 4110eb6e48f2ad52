//! Foundational utilities shared across bridge crates.
//!
//! Provides UTC timestamp helpers, chat message chunking, and single-line
//! sanitization used by the context store, transcript sink, and runtime.

pub mod chunking;
pub mod text;
pub mod time_utils;

pub use chunking::{split_message, DEFAULT_MAX_MESSAGE_LENGTH, EMPTY_RESPONSE_PLACEHOLDER};
pub use text::{sanitize_single_line, truncate};
pub use time_utils::{current_unix_timestamp_ms, format_utc_timestamp, now_utc};
