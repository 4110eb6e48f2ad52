use chrono::{DateTime, SecondsFormat, Utc};

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns the current UTC instant.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Formats a UTC instant as `YYYY-MM-DDTHH:MM:SSZ`.
///
/// Transcript lines, reset markers, and the grounding instruction all use
/// this formatter so user-visible timestamps stay consistent.
pub fn format_utc_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}
