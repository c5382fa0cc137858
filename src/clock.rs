//! Conversions between chrono's naive calendar types and engine `Ms`.
//!
//! Wall-clock times are mapped onto the epoch as if they were UTC. Nothing
//! here knows about timezones.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::engine::EngineError;
use crate::model::{Ms, Span};

pub fn to_ms(dt: NaiveDateTime) -> Ms {
    dt.and_utc().timestamp_millis()
}

pub fn from_ms(ms: Ms) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

pub fn at(date: NaiveDate, time: NaiveTime) -> Ms {
    to_ms(date.and_time(time))
}

/// `[date 00:00, next day 00:00)`.
pub fn day_span(date: NaiveDate) -> Span {
    let start = at(date, NaiveTime::MIN);
    Span::new(start, start + 24 * 3_600_000)
}

/// 0 = Sunday … 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Parse a "HH:MM" wall-clock string.
pub fn parse_hhmm(s: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| EngineError::InvalidInput("time must be HH:MM"))
}

/// Format the wall-clock part of an instant as "HH:MM".
pub fn format_hhmm(ms: Ms) -> String {
    match from_ms(ms) {
        Some(dt) => format!("{:02}:{:02}", dt.hour(), dt.minute()),
        None => String::from("??:??"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn sunday_is_zero() {
        // 2026-10-18 is a Sunday.
        assert_eq!(day_of_week(date(2026, 10, 18)), 0);
        assert_eq!(day_of_week(date(2026, 10, 19)), 1);
        assert_eq!(day_of_week(date(2026, 10, 24)), 6);
    }

    #[test]
    fn day_span_is_24_hours() {
        let span = day_span(date(2026, 3, 29));
        assert_eq!(span.duration_ms(), 24 * 3_600_000);
        assert_eq!(format_hhmm(span.start), "00:00");
    }

    #[test]
    fn parse_and_format() {
        let t = parse_hhmm("09:30").unwrap();
        let ms = at(date(2026, 1, 5), t);
        assert_eq!(format_hhmm(ms), "09:30");
        assert_eq!(from_ms(ms).unwrap(), date(2026, 1, 5).and_time(t));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_hhmm("9").is_err());
        assert!(parse_hhmm("25:00").is_err());
        assert!(parse_hhmm("noon").is_err());
    }
}
