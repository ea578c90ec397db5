//! Column encodings shared by the SQLite adapters.
//!
//! Instants are stored as INTEGER microseconds since the Unix epoch so range filters
//! compare numerically. Calendar dates and times of day are stored as ISO text.

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};

use crate::errors::{Result, StorageError};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

pub fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub fn from_micros(table: &'static str, micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| StorageError::Corrupt {
        table,
        reason: format!("timestamp {micros} out of range"),
    })
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(table: &'static str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| StorageError::Corrupt {
        table,
        reason: format!("bad date '{raw}': {e}"),
    })
}

pub fn format_time(time: &NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub fn parse_time(table: &'static str, raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, TIME_FORMAT).map_err(|e| StorageError::Corrupt {
        table,
        reason: format!("bad time '{raw}': {e}"),
    })
}

/// Splits an instant into its calendar date and a whole-second time of day.
pub fn split_timestamp(ts: &DateTime<Utc>) -> (NaiveDate, NaiveTime) {
    let naive = ts.naive_utc();
    let time = naive.time().with_nanosecond(0).unwrap_or(naive.time());
    (naive.date(), time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_split_timestamp_drops_subseconds() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 58).unwrap()
            + chrono::Duration::milliseconds(750);
        let (date, time) = split_timestamp(&ts);
        assert_eq!(format_date(&date), "2025-06-30");
        assert_eq!(format_time(&time), "23:59:58");
    }

    #[test]
    fn test_micros_roundtrip_rejects_out_of_range() {
        let ts = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(from_micros("t", to_micros(&ts)).unwrap(), ts);
        assert!(from_micros("t", i64::MAX).is_err());
    }
}
