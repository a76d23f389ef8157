//! Timestamp rendering and day keys
//!
//! Source documents carry timestamps as BSON dates most of the time, but
//! older records store strings or epoch milliseconds. Everything is
//! normalised to a fixed-width `YYYY-MM-DD HH:MM:SS` in a fixed offset.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use mongodb::bson::Bson;

const OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DAY_FORMAT: &str = "%Y-%m-%d";

/// Day key for a record with no usable timestamp.
pub const UNKNOWN_DAY: &str = "unknown";

/// Day key for a record whose timestamp cannot be parsed.
pub const INVALID_DAY: &str = "invalid";

/// Formats BSON timestamps in a fixed UTC offset
#[derive(Debug, Clone, Copy)]
pub struct TimestampFormatter {
    offset: FixedOffset,
}

/// Result of reading a timestamp cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Missing,
    Invalid,
    Valid(DateTime<Utc>),
}

impl TimestampFormatter {
    /// Create a formatter for `offset_minutes` east of UTC
    ///
    /// Offsets outside +/- 24h fall back to UTC; config validation rejects
    /// them before this point.
    pub fn new(offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(0)
    }

    /// Render a value as `YYYY-MM-DD HH:MM:SS`, or an empty string
    pub fn format(&self, value: Option<&Bson>) -> String {
        match read_timestamp(value) {
            Timestamp::Valid(dt) => self.format_datetime(dt),
            Timestamp::Missing | Timestamp::Invalid => String::new(),
        }
    }

    pub fn format_datetime(&self, dt: DateTime<Utc>) -> String {
        dt.with_timezone(&self.offset).format(OUTPUT_FORMAT).to_string()
    }

    /// Calendar day of a value in the configured offset
    pub fn day_key(&self, value: Option<&Bson>) -> String {
        match read_timestamp(value) {
            Timestamp::Valid(dt) => dt.with_timezone(&self.offset).format(DAY_FORMAT).to_string(),
            Timestamp::Missing => UNKNOWN_DAY.to_string(),
            Timestamp::Invalid => INVALID_DAY.to_string(),
        }
    }
}

impl Default for TimestampFormatter {
    fn default() -> Self {
        Self::utc()
    }
}

/// Interpret a BSON value as a point in time
pub fn read_timestamp(value: Option<&Bson>) -> Timestamp {
    let millis = match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => return Timestamp::Missing,
        Some(Bson::DateTime(dt)) => dt.timestamp_millis(),
        Some(Bson::String(s)) if s.trim().is_empty() => return Timestamp::Missing,
        Some(Bson::String(s)) => {
            return parse_timestamp_str(s).map_or(Timestamp::Invalid, Timestamp::Valid);
        }
        Some(Bson::Int32(n)) => i64::from(*n),
        Some(Bson::Int64(n)) => *n,
        Some(Bson::Double(f)) if f.is_finite() => *f as i64,
        Some(Bson::Timestamp(ts)) => i64::from(ts.time) * 1000,
        Some(_) => return Timestamp::Invalid,
    };

    DateTime::<Utc>::from_timestamp_millis(millis).map_or(Timestamp::Invalid, Timestamp::Valid)
}

/// Parse the string timestamp shapes found in the collections
///
/// RFC 3339 first, then naive date-times (treated as UTC), then bare dates.
pub fn parse_timestamp_str(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::DateTime as BsonDateTime;

    fn bson_date(rfc3339: &str) -> Bson {
        let dt = DateTime::parse_from_rfc3339(rfc3339).unwrap();
        Bson::DateTime(BsonDateTime::from_millis(dt.timestamp_millis()))
    }

    #[test]
    fn test_format_bson_date_utc() {
        let fmt = TimestampFormatter::utc();
        let value = bson_date("2025-07-05T03:04:09.500Z");
        assert_eq!(fmt.format(Some(&value)), "2025-07-05 03:04:09");
    }

    #[test]
    fn test_format_with_fixed_offset() {
        let fmt = TimestampFormatter::new(5 * 60);
        let value = bson_date("2025-06-30T19:30:00Z");
        assert_eq!(fmt.format(Some(&value)), "2025-07-01 00:30:00");
        assert_eq!(fmt.day_key(Some(&value)), "2025-07-01");
        assert_eq!(TimestampFormatter::utc().day_key(Some(&value)), "2025-06-30");
    }

    #[test]
    fn test_format_strings_and_numbers() {
        let fmt = TimestampFormatter::utc();
        assert_eq!(
            fmt.format(Some(&Bson::String("2025-07-05T03:04:09Z".into()))),
            "2025-07-05 03:04:09"
        );
        assert_eq!(
            fmt.format(Some(&Bson::String("2025-07-05 03:04:09".into()))),
            "2025-07-05 03:04:09"
        );
        assert_eq!(
            fmt.format(Some(&Bson::Int64(1_751_684_649_000))),
            "2025-07-05 03:04:09"
        );
    }

    #[test]
    fn test_bad_values_degrade_to_empty() {
        let fmt = TimestampFormatter::utc();
        assert_eq!(fmt.format(None), "");
        assert_eq!(fmt.format(Some(&Bson::Null)), "");
        assert_eq!(fmt.format(Some(&Bson::String("not a date".into()))), "");
        assert_eq!(fmt.format(Some(&Bson::Boolean(true))), "");
        assert_eq!(fmt.format(Some(&Bson::Double(f64::NAN))), "");
    }

    #[test]
    fn test_day_key_sentinels() {
        let fmt = TimestampFormatter::utc();
        assert_eq!(fmt.day_key(None), UNKNOWN_DAY);
        assert_eq!(fmt.day_key(Some(&Bson::String(String::new()))), UNKNOWN_DAY);
        assert_eq!(fmt.day_key(Some(&Bson::String("garbage".into()))), INVALID_DAY);
    }
}
