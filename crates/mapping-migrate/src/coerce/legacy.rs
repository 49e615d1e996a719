//! Parsers for the date encodings found in legacy source tables.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Text that means "no date" in legacy columns.
const DATE_SENTINELS: &[&str] = &["", "00000000", "000", "//", "nan"];

/// Date-only layouts tried after the numeric forms.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%m/%d/%Y",
    "%d-%b-%Y",
    "%b %d %Y",
    "%B %d, %Y",
    "%Y年%m月%d日",
];

/// Timestamp layouts whose date part is kept.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Whether the text is one of the legacy "no date" markers.
pub fn is_date_sentinel(s: &str) -> bool {
    let lowered = s.to_lowercase();
    DATE_SENTINELS.contains(&lowered.as_str())
}

/// Reformat compact numeric dates without validating them.
///
/// `YYYYMMDD` becomes `YYYY-MM-DD` and `YYYYMM` becomes `YYYY-MM-01`.
pub fn compact_numeric_date(s: &str) -> Option<String> {
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match s.len() {
        8 => Some(format!("{}-{}-{}", &s[..4], &s[4..6], &s[6..8])),
        6 => Some(format!("{}-{}-01", &s[..4], &s[4..6])),
        _ => None,
    }
}

/// Best-effort parse of a free-form date or timestamp.
pub fn parse_any_date(s: &str) -> Option<NaiveDate> {
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    parse_month_day_year_clock(s).map(|dt| dt.date())
}

/// Parse `MM DD YYYY h:mmAM` with any amount of whitespace between parts.
///
/// The meridiem may be attached to the time (`5:36PM`) or separate
/// (`5:36 PM`); seconds are optional.
pub fn parse_month_day_year_clock(s: &str) -> Option<NaiveDateTime> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    let (month, day, year, clock) = match tokens.as_slice() {
        [m, d, y, t] => (*m, *d, *y, t.to_string()),
        [m, d, y, t, meridiem] => (*m, *d, *y, format!("{}{}", t, meridiem)),
        _ => return None,
    };

    if year.len() != 4 {
        return None;
    }
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    let year: i32 = year.parse().ok()?;

    let upper = clock.to_uppercase();
    let (time, pm) = if let Some(t) = upper.strip_suffix("PM") {
        (t.to_string(), true)
    } else if let Some(t) = upper.strip_suffix("AM") {
        (t.to_string(), false)
    } else {
        return None;
    };

    let mut parts = time.split(':');
    let hour: u32 = parts.next()?.parse().ok()?;
    let minute: u32 = parts.next()?.parse().ok()?;
    let second: u32 = match parts.next() {
        Some(s) => s.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() || !(1..=12).contains(&hour) {
        return None;
    }
    let hour = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    };

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Date part of a 13-digit `YYYYMMDDHHMMS` stamp, not validated.
pub fn thirteen_digit_date(s: &str) -> Option<String> {
    if s.len() == 13 && s.bytes().all(|b| b.is_ascii_digit()) {
        Some(format!("{}-{}-{}", &s[..4], &s[4..6], &s[6..8]))
    } else {
        None
    }
}
