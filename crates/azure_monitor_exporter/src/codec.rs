//! Identifier and time encodings used by the ingestion schema.
//!
//! All functions are pure. Timestamps and durations are truncated, never
//! rounded: a span starting at `…027613500ns` is reported at `…027613` µs.

use chrono::{DateTime, SecondsFormat, Utc};

const NANOS_PER_SEC: u64 = 1_000_000_000;
const NANOS_PER_MICRO: u64 = 1_000;
const NANOS_PER_MILLI: u64 = 1_000_000;

/// Renders a trace id as 32 lowercase hex digits.
pub fn trace_id_hex(trace_id: u128) -> String {
    format!("{trace_id:032x}")
}

/// Renders a span id as 16 lowercase hex digits.
pub fn span_id_hex(span_id: u64) -> String {
    format!("{span_id:016x}")
}

/// Formats Unix nanoseconds as `YYYY-MM-DDTHH:MM:SS.ffffffZ` in UTC.
pub fn format_time(unix_nanos: u64) -> String {
    let secs = (unix_nanos / NANOS_PER_SEC) as i64;
    let micros_as_nanos = (unix_nanos % NANOS_PER_SEC) / NANOS_PER_MICRO * NANOS_PER_MICRO;
    // Out-of-range seconds only occur far beyond year 262143.
    let time = DateTime::<Utc>::from_timestamp(secs, micros_as_nanos as u32).unwrap_or_default();
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Formats a nanosecond duration as `<days>.<HH>:<MM>:<SS>.<fff>`.
pub fn format_duration(nanos: u64) -> String {
    let total_millis = nanos / NANOS_PER_MILLI;
    let millis = total_millis % 1_000;
    let total_secs = total_millis / 1_000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = (total_secs / 3_600) % 24;
    let days = total_secs / 86_400;
    format!("{days}.{hours:02}:{mins:02}:{secs:02}.{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_id_hex() {
        assert_eq!(span_id_hex(12030755672171557337), "a6f5d48acb4d31d9");
        assert_eq!(span_id_hex(12030755672171557338), "a6f5d48acb4d31da");
        assert_eq!(span_id_hex(1), "0000000000000001");
    }

    #[test]
    fn test_trace_id_hex() {
        assert_eq!(
            trace_id_hex(36873507687745823477771305566750195431),
            "1bbd944a73a05d89eab5d3740a213ee7"
        );
        assert_eq!(trace_id_hex(0xff), "000000000000000000000000000000ff");
    }

    #[test]
    fn test_format_time_truncates_to_micros() {
        assert_eq!(format_time(1575494316027613500), "2019-12-04T21:18:36.027613Z");
        assert_eq!(format_time(1575494316027613999), "2019-12-04T21:18:36.027613Z");
        assert_eq!(format_time(0), "1970-01-01T00:00:00.000000Z");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(1_001_000_000), "0.00:00:01.001");
        assert_eq!(format_duration(999_999), "0.00:00:00.000");
        // 1 day, 2 hours, 3 minutes, 4 seconds, 5.9 ms
        let nanos = ((86_400 + 2 * 3_600 + 3 * 60 + 4) * 1_000 + 5) * 1_000_000 + 900_000;
        assert_eq!(format_duration(nanos), "1.02:03:04.005");
    }
}
