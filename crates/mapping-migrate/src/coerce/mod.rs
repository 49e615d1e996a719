//! Per-field type coercion.
//!
//! [`convert`] turns one raw source value into the value inserted for a
//! target field, according to the field's [`ConversionRule`]. It never fails:
//! a value that cannot be coerced falls back to the rule's default (or NULL)
//! and a warning is logged. The insert is still attempted with that value.

mod legacy;

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;
use tracing::warn;

use crate::core::value::SqlValue;

pub use legacy::parse_month_day_year_clock;

/// Target type family, parsed from a mapping's `data_type` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    /// Any tag containing `varchar` (`varchar(20)`, `nvarchar(max)`).
    Varchar(String),
    /// Exactly `int`.
    Int,
    /// Any tag containing `decimal`.
    Decimal(String),
    /// Exactly `date`.
    Date,
    /// Exactly `datetime`.
    DateTime,
    /// Anything else. Values pass through unchanged.
    Other(String),
}

impl DataType {
    /// Classify a tag, case-insensitively after trimming.
    pub fn parse(tag: &str) -> Self {
        let tag = tag.trim().to_lowercase();
        if tag.contains("varchar") {
            DataType::Varchar(tag)
        } else if tag == "int" {
            DataType::Int
        } else if tag.contains("decimal") {
            DataType::Decimal(tag)
        } else if tag == "date" {
            DataType::Date
        } else if tag == "datetime" {
            DataType::DateTime
        } else {
            DataType::Other(tag)
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Varchar(tag) | DataType::Decimal(tag) | DataType::Other(tag) => {
                f.write_str(tag)
            }
            DataType::Int => f.write_str("int"),
            DataType::Date => f.write_str("date"),
            DataType::DateTime => f.write_str("datetime"),
        }
    }
}

/// What row conversion needs to know about one source field.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRule {
    /// Declared target type.
    pub data_type: DataType,
    /// Whether the target column rejects NULL.
    pub not_null: bool,
    /// Fallback when the value cannot be coerced.
    pub default_value: Option<SqlValue>,
}

impl ConversionRule {
    /// Build a rule from a raw type tag.
    pub fn new(data_type: &str, not_null: bool, default_value: Option<SqlValue>) -> Self {
        Self {
            data_type: DataType::parse(data_type),
            not_null,
            default_value,
        }
    }
}

/// Why a value could not be coerced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoerceError {
    /// Text that is not a number.
    #[error("'{0}' is not a number")]
    NotNumeric(String),

    /// A number outside the target's range (or not finite).
    #[error("{0} does not fit in an integer")]
    OutOfRange(String),

    /// Text no date layout matched.
    #[error("cannot parse date '{0}'")]
    UnparseableDate(String),

    /// A value of a kind the target type cannot take.
    #[error("cannot convert {value} to {target}")]
    Unsupported { value: String, target: String },
}

/// Convert one raw value, falling back to the rule's default on failure.
pub fn convert(raw: &SqlValue, rule: &ConversionRule) -> SqlValue {
    match try_convert(raw, rule) {
        Ok(value) => value,
        Err(e) => {
            warn!("Type conversion to {} failed: {}", rule.data_type, e);
            rule.default_value.clone().unwrap_or(SqlValue::Null)
        }
    }
}

/// Convert one raw value, reporting failures.
pub fn try_convert(raw: &SqlValue, rule: &ConversionRule) -> Result<SqlValue, CoerceError> {
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }

    match &rule.data_type {
        DataType::Varchar(_) => Ok(SqlValue::Text(raw.to_text())),
        DataType::Int => to_int(raw).map(SqlValue::I64),
        DataType::Decimal(_) => to_float(raw).map(SqlValue::F64),
        DataType::Date => to_date(raw),
        DataType::DateTime => Ok(to_datetime(raw)),
        DataType::Other(_) => Ok(raw.clone()),
    }
}

fn to_float(raw: &SqlValue) -> Result<f64, CoerceError> {
    match raw {
        SqlValue::F64(f) => Ok(*f),
        SqlValue::I64(n) => Ok(*n as f64),
        SqlValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        SqlValue::Decimal(d) => d
            .to_f64()
            .ok_or_else(|| CoerceError::OutOfRange(d.to_string())),
        SqlValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CoerceError::NotNumeric(s.clone())),
        other => Err(CoerceError::Unsupported {
            value: other.to_text(),
            target: "number".into(),
        }),
    }
}

/// Parse as floating point, then truncate toward zero.
fn to_int(raw: &SqlValue) -> Result<i64, CoerceError> {
    if let SqlValue::I64(n) = raw {
        return Ok(*n);
    }
    let f = to_float(raw)?.trunc();
    if !f.is_finite() || f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return Err(CoerceError::OutOfRange(raw.to_text()));
    }
    Ok(f as i64)
}

fn to_date(raw: &SqlValue) -> Result<SqlValue, CoerceError> {
    let text = match raw {
        SqlValue::Date(d) => return Ok(SqlValue::Text(d.format("%Y-%m-%d").to_string())),
        SqlValue::DateTime(dt) => return Ok(SqlValue::Text(dt.format("%Y-%m-%d").to_string())),
        SqlValue::DateTimeOffset(dt) => {
            return Ok(SqlValue::Text(dt.format("%Y-%m-%d").to_string()))
        }
        other => other.to_text(),
    };
    let s = text.trim();

    if legacy::is_date_sentinel(s) {
        return Ok(SqlValue::Null);
    }
    if let Some(date) = legacy::compact_numeric_date(s) {
        return Ok(SqlValue::Text(date));
    }
    legacy::parse_any_date(s)
        .map(|d| SqlValue::Text(d.format("%Y-%m-%d").to_string()))
        .ok_or_else(|| CoerceError::UnparseableDate(s.to_string()))
}

/// Legacy timestamp text to `YYYY-MM-DD HH:MM:SS`; unknown shapes pass through.
fn to_datetime(raw: &SqlValue) -> SqlValue {
    let SqlValue::Text(text) = raw else {
        return raw.clone();
    };
    let s = text.trim();
    if s.is_empty() {
        return SqlValue::Null;
    }
    if let Some(dt) = legacy::parse_month_day_year_clock(s) {
        return SqlValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string());
    }
    if let Some(date) = legacy::thirteen_digit_date(s) {
        return SqlValue::Text(date);
    }
    raw.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rule(tag: &str) -> ConversionRule {
        ConversionRule::new(tag, false, None)
    }

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.to_string())
    }

    #[test]
    fn test_data_type_parse() {
        assert_eq!(DataType::parse(" NVARCHAR(10) "), DataType::Varchar("nvarchar(10)".into()));
        assert_eq!(DataType::parse("INT"), DataType::Int);
        assert_eq!(DataType::parse("bigint"), DataType::Other("bigint".into()));
        assert_eq!(DataType::parse("decimal(18,2)"), DataType::Decimal("decimal(18,2)".into()));
        assert_eq!(DataType::parse("Date"), DataType::Date);
        assert_eq!(DataType::parse("datetime2"), DataType::Other("datetime2".into()));
    }

    #[test]
    fn test_null_stays_null_for_every_type() {
        for tag in ["varchar(5)", "int", "decimal", "date", "datetime", "xml"] {
            let r = ConversionRule::new(tag, true, Some(text("fallback")));
            assert!(convert(&SqlValue::Null, &r).is_null(), "{tag}");
        }
    }

    #[test]
    fn test_varchar_booleans() {
        assert_eq!(convert(&SqlValue::Bool(true), &rule("nvarchar(10)")), text("1"));
        assert_eq!(convert(&SqlValue::Bool(false), &rule("nvarchar(10)")), text("0"));
    }

    #[test]
    fn test_varchar_stringifies() {
        assert_eq!(convert(&SqlValue::I64(42), &rule("varchar(10)")), text("42"));
        assert_eq!(convert(&SqlValue::F64(2.0), &rule("varchar(10)")), text("2.0"));
    }

    #[test]
    fn test_int_truncates() {
        assert_eq!(convert(&text("12.9"), &rule("int")), SqlValue::I64(12));
        assert_eq!(convert(&text(" -3.7 "), &rule("int")), SqlValue::I64(-3));
        assert_eq!(convert(&SqlValue::F64(7.99), &rule("int")), SqlValue::I64(7));
        assert_eq!(convert(&SqlValue::Bool(true), &rule("int")), SqlValue::I64(1));
    }

    #[test]
    fn test_int_failure_uses_default() {
        let r = ConversionRule::new("int", true, Some(SqlValue::I64(0)));
        assert_eq!(convert(&text("abc"), &r), SqlValue::I64(0));
        assert!(convert(&text("abc"), &rule("int")).is_null());
        assert!(try_convert(&text("nan"), &rule("int")).is_err());
    }

    #[test]
    fn test_decimal() {
        assert_eq!(convert(&text("1.25"), &rule("decimal(10,2)")), SqlValue::F64(1.25));
        assert_eq!(convert(&SqlValue::I64(3), &rule("decimal")), SqlValue::F64(3.0));
        assert!(convert(&text("1,25"), &rule("decimal")).is_null());
    }

    #[test]
    fn test_date_compact_forms() {
        assert_eq!(convert(&text("20230115"), &rule("date")), text("2023-01-15"));
        assert_eq!(convert(&text("202301"), &rule("date")), text("2023-01-01"));
        assert_eq!(convert(&SqlValue::I64(20230115), &rule("date")), text("2023-01-15"));
    }

    #[test]
    fn test_date_sentinels_are_null() {
        for s in ["", "00000000", "000", "//", "nan"] {
            assert!(convert(&text(s), &rule("date")).is_null(), "{s:?}");
        }
    }

    #[test]
    fn test_date_generic_and_native() {
        assert_eq!(convert(&text("2023/1/5"), &rule("date")), text("2023-01-05"));
        let d = NaiveDate::from_ymd_opt(2020, 2, 29).unwrap();
        assert_eq!(convert(&SqlValue::Date(d), &rule("date")), text("2020-02-29"));
    }

    #[test]
    fn test_date_failure_uses_default() {
        let r = ConversionRule::new("date", false, Some(text("1900-01-01")));
        assert_eq!(convert(&text("someday"), &r), text("1900-01-01"));
        assert!(convert(&text("someday"), &rule("date")).is_null());
    }

    #[test]
    fn test_datetime_legacy_text() {
        assert_eq!(
            convert(&text("10 27 2015  5:36PM"), &rule("datetime")),
            text("2015-10-27 17:36:00")
        );
    }

    #[test]
    fn test_datetime_thirteen_digits_keeps_date_only() {
        assert_eq!(
            convert(&text("2015102717365"), &rule("datetime")),
            text("2015-10-27")
        );
    }

    #[test]
    fn test_datetime_passthrough() {
        assert_eq!(
            convert(&text("2015-10-27 17:36:00"), &rule("datetime")),
            text("2015-10-27 17:36:00")
        );
        assert!(convert(&text(""), &rule("datetime")).is_null());
        let dt = NaiveDate::from_ymd_opt(2015, 10, 27)
            .and_then(|d| d.and_hms_opt(1, 2, 3))
            .unwrap();
        assert_eq!(
            convert(&SqlValue::DateTime(dt), &rule("datetime")),
            SqlValue::DateTime(dt)
        );
    }

    #[test]
    fn test_unknown_type_passes_through() {
        assert_eq!(convert(&text(" x "), &rule("money")), text(" x "));
        assert_eq!(convert(&SqlValue::I64(5), &rule("")), SqlValue::I64(5));
    }
}
