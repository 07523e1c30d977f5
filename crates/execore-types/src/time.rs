//! Timestamp helpers.
//!
//! The core works exclusively in nanoseconds since the UNIX epoch as
//! `i64`, matching the chain time service. These helpers exist only at
//! the logging/display boundary.

use chrono::{DateTime, TimeZone, Utc};

/// Converts a chain timestamp to a UTC datetime for log lines.
/// Out-of-range values clamp to the epoch rather than failing, since
/// this is display-only.
#[must_use]
pub fn nanos_to_datetime(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

/// Formats a chain timestamp as RFC 3339 with nanosecond precision.
#[must_use]
pub fn format_nanos(nanos: i64) -> String {
    nanos_to_datetime(nanos).to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_formats_cleanly() {
        assert_eq!(format_nanos(0), "1970-01-01T00:00:00.000000000Z");
    }

    #[test]
    fn round_second() {
        assert_eq!(format_nanos(1_000_000_000), "1970-01-01T00:00:01.000000000Z");
    }
}
