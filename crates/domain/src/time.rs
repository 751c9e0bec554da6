use chrono::{DateTime, Utc};

use crate::Error;

/// Current time in Unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Renders milliseconds since the epoch as RFC3339 with millisecond
/// resolution, e.g. `2025-11-03T10:00:00.000Z`.
pub fn rfc3339_millis(ms: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(|| Utc::now());
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parses a client-asserted `updatedTs` into milliseconds. Anything that
/// isn't a valid RFC3339 timestamp is a validation failure, not a panic.
pub fn try_parse_rfc3339_ms(s: &str) -> Result<i64, Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .map_err(|_| Error::validation(format!("invalid timestamp: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_millis() {
        let ms = 1_730_628_000_123;
        let s = rfc3339_millis(ms);
        assert_eq!(try_parse_rfc3339_ms(&s).unwrap(), ms);
    }

    #[test]
    fn rejects_garbage() {
        assert!(try_parse_rfc3339_ms("not-a-date").is_err());
    }

    #[test]
    fn accepts_zulu_and_offset_forms() {
        assert!(try_parse_rfc3339_ms("2025-11-03T10:00:00.000Z").is_ok());
        assert!(try_parse_rfc3339_ms("2025-11-03T10:00:00.000+00:00").is_ok());
    }
}
