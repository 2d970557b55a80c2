use chrono::{DateTime, NaiveDateTime, Utc};

/// Handles parsing timestamps from the formats seen in usage logs
pub struct TimestampParser;

impl TimestampParser {
    /// Parse a timestamp string into a `DateTime<Utc>`
    ///
    /// Accepts RFC 3339 (with `Z` or an offset) and naive ISO-8601, which is taken as UTC.
    pub fn parse(timestamp_str: &str) -> Option<DateTime<Utc>> {
        let trimmed = timestamp_str.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Some(dt.with_timezone(&Utc));
        }

        // Some producers write a lowercase zone designator
        if let Some(stripped) = trimmed.strip_suffix('z') {
            if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{stripped}Z")) {
                return Some(dt.with_timezone(&Utc));
            }
        }

        NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
    }
}
