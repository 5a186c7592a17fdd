//! Partial date/time values as instant ranges.
//!
//! A FHIR date may be truncated at any precision; `2020-03` covers the whole
//! of March. Indexed dates and search values are both widened to the closed
//! UTC range they cover, so comparisons reduce to range arithmetic.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;

static DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})(?:-(\d{2})(?:-(\d{2})(?:T(\d{2}):(\d{2})(?::(\d{2})(?:\.(\d{1,9}))?)?(Z|[+-]\d{2}:\d{2})?)?)?)?$",
    )
    .expect("date pattern is valid")
});

static TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2}):(\d{2})(?::(\d{2})(?:\.(\d{1,9}))?)?$").expect("time pattern is valid")
});

/// Lower bound used for an open-ended period start.
pub fn min_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Upper bound used for an open-ended period end.
pub fn max_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .map(|t| t + Duration::microseconds(999_999))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn last_microsecond(next: DateTime<Utc>) -> DateTime<Utc> {
    next - Duration::microseconds(1)
}

/// Parses a (possibly partial) date or dateTime into the range it covers.
/// Returns `None` for anything that is not a valid FHIR date.
///
/// ```
/// use helios_persistence_jdbc::search::parse_date_range;
/// use helios_persistence_jdbc::types::format_instant;
///
/// let (start, end) = parse_date_range("2020").unwrap();
/// assert_eq!(format_instant(&start), "2020-01-01T00:00:00.000000Z");
/// assert_eq!(format_instant(&end), "2020-12-31T23:59:59.999999Z");
/// ```
pub fn parse_date_range(value: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let caps = DATE_TIME.captures(value.trim())?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
    let Some(month) = num(2) else {
        let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
        let next = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()?;
        return Some((start, last_microsecond(next)));
    };
    let Some(day) = num(3) else {
        let start = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let next = Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0).single()?;
        return Some((start, last_microsecond(next)));
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let Some(hour) = num(4) else {
        let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?);
        return Some((start, last_microsecond(start + Duration::days(1))));
    };

    let minute = num(5)?;
    let second = num(6);
    let fraction = caps.get(7).map(|m| m.as_str());
    let offset = match caps.get(8).map(|m| m.as_str()) {
        None | Some("Z") => FixedOffset::east_opt(0)?,
        Some(tz) => parse_offset(tz)?,
    };

    let nanos = fraction.map(fraction_nanos).unwrap_or(0);
    let time = NaiveTime::from_hms_nano_opt(hour, minute, second.unwrap_or(0), nanos)?;
    let local = NaiveDateTime::new(date, time);
    let start = offset.from_local_datetime(&local).single()?.with_timezone(&Utc);

    let end = match (second, fraction) {
        (None, _) => last_microsecond(start + Duration::minutes(1)),
        (Some(_), None) => last_microsecond(start + Duration::seconds(1)),
        (Some(_), Some(_)) => start,
    };
    Some((start, end))
}

/// Parses a FHIR `time` (`HH:MM[:SS[.fff]]`) as a range on 1970-01-01 UTC.
pub fn parse_time_range(value: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let caps = TIME.captures(value.trim())?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let second = num(3);
    let fraction = caps.get(4).map(|m| m.as_str());
    let time = NaiveTime::from_hms_nano_opt(
        num(1)?,
        num(2)?,
        second.unwrap_or(0),
        fraction.map(fraction_nanos).unwrap_or(0),
    )?;
    let start = Utc.from_utc_datetime(&NaiveDate::from_ymd_opt(1970, 1, 1)?.and_time(time));
    let end = match (second, fraction) {
        (None, _) => last_microsecond(start + Duration::minutes(1)),
        (Some(_), None) => last_microsecond(start + Duration::seconds(1)),
        (Some(_), Some(_)) => start,
    };
    Some((start, end))
}

fn fraction_nanos(fraction: &str) -> u32 {
    // right-pad to nanoseconds: ".5" is 500ms
    let digits: String = fraction.chars().chain(std::iter::repeat('0')).take(9).collect();
    digits.parse().unwrap_or(0)
}

fn parse_offset(tz: &str) -> Option<FixedOffset> {
    let sign = if tz.starts_with('-') { -1 } else { 1 };
    let (hours, minutes) = tz[1..].split_once(':')?;
    let seconds = hours.parse::<i32>().ok()? * 3600 + minutes.parse::<i32>().ok()? * 60;
    FixedOffset::east_opt(sign * seconds)
}
