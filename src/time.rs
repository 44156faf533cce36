//! Instant conversion and parsing helpers
//!
//! All calendar arithmetic works on naive (zone-less) wall-clock instants.
//! Dates become their midnight; zoned datetimes become their local time.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

/// Conversion into the naive instant used for bucketing
pub trait ToInstant {
    fn to_instant(&self) -> NaiveDateTime;
}

impl ToInstant for NaiveDateTime {
    fn to_instant(&self) -> NaiveDateTime {
        *self
    }
}

impl ToInstant for NaiveDate {
    fn to_instant(&self) -> NaiveDateTime {
        self.and_time(NaiveTime::MIN)
    }
}

impl<Tz: TimeZone> ToInstant for DateTime<Tz> {
    fn to_instant(&self) -> NaiveDateTime {
        self.naive_local()
    }
}

impl<T: ToInstant + ?Sized> ToInstant for &T {
    fn to_instant(&self) -> NaiveDateTime {
        (**self).to_instant()
    }
}

/// Parse an instant from the textual forms seen in bucket keys, CSV cells and CLI args
///
/// Date-only inputs resolve to midnight.
pub fn parse_instant(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();

    const DATETIME_FORMATS: [&str; 6] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.to_instant());
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_local())
}

/// Render an instant as ISO-8601 text that sorts lexicographically
pub fn format_instant(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}
