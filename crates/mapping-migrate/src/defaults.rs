//! Default-value specifications and their resolution.
//!
//! A mapping field's `default` is authored either as a `{type, value}` map or
//! as a raw text cell that may itself hold that map as JSON. It is parsed
//! into a [`DefaultValue`] and evaluated per row against an injected
//! [`Clock`], so `now()` yields the time the row is built.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

use crate::core::value::SqlValue;

/// Authored default-value descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultSpec {
    /// `{type: nvarchar|decimal|function|..., value: ...}`
    Structured {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        value: JsonValue,
    },
    /// A text cell, possibly containing the structured form as JSON.
    Text(String),
    /// A bare number or boolean.
    Scalar(JsonValue),
}

/// Parsed default value.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// A fixed value.
    Literal(SqlValue),
    /// A function evaluated per row.
    Function(String),
}

/// Why a default could not be produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// `type: function` naming something other than `now()`.
    #[error("unsupported default function: {0}")]
    UnsupportedFunction(String),

    /// `type: decimal` with a value that is not a number.
    #[error("default '{0}' is not a number")]
    NotNumeric(String),
}

impl DefaultSpec {
    /// Parse the descriptor. `Ok(None)` means "no default" (NULL).
    pub fn parse(&self) -> Result<Option<DefaultValue>, ResolveError> {
        match self {
            DefaultSpec::Structured { kind, value } => parse_structured(kind, value).map(Some),
            DefaultSpec::Text(text) => {
                if text.trim().is_empty() {
                    return Ok(None);
                }
                match serde_json::from_str::<JsonValue>(text) {
                    Ok(JsonValue::Object(map)) => {
                        let kind = map.get("type").and_then(JsonValue::as_str).unwrap_or("");
                        let value = map.get("value").cloned().unwrap_or(JsonValue::Null);
                        parse_structured(kind, &value).map(Some)
                    }
                    // Anything that is not a JSON object is the literal text itself.
                    _ => Ok(Some(DefaultValue::Literal(SqlValue::Text(text.clone())))),
                }
            }
            DefaultSpec::Scalar(value) => Ok(Some(DefaultValue::Literal(json_to_sql(value)))),
        }
    }

    /// The fixed value of this default, if it has one.
    ///
    /// Used as the conversion fallback; function defaults have none.
    pub fn literal(&self) -> Option<SqlValue> {
        match self.parse() {
            Ok(Some(DefaultValue::Literal(v))) => Some(v),
            _ => None,
        }
    }
}

fn parse_structured(kind: &str, value: &JsonValue) -> Result<DefaultValue, ResolveError> {
    match kind.trim().to_lowercase().as_str() {
        "nvarchar" => Ok(DefaultValue::Literal(match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        })),
        "decimal" => {
            let parsed = match value {
                JsonValue::Number(n) => n.as_f64(),
                JsonValue::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            parsed
                .map(|f| DefaultValue::Literal(SqlValue::F64(f)))
                .ok_or_else(|| ResolveError::NotNumeric(json_text(value)))
        }
        "function" => Ok(DefaultValue::Function(json_text(value))),
        _ => Ok(DefaultValue::Literal(json_to_sql(value))),
    }
}

fn json_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_to_sql(value: &JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Bool(*b),
        JsonValue::Number(n) => n
            .as_i64()
            .map(SqlValue::I64)
            .or_else(|| n.as_f64().map(SqlValue::F64))
            .unwrap_or_else(|| SqlValue::Text(n.to_string())),
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Source of the current time for `now()` defaults.
pub trait Clock: Send + Sync {
    /// Current local time.
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock time in the local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Evaluate a parsed default.
pub fn evaluate(value: &DefaultValue, clock: &dyn Clock) -> Result<SqlValue, ResolveError> {
    match value {
        DefaultValue::Literal(v) => Ok(v.clone()),
        DefaultValue::Function(name) if name.trim().eq_ignore_ascii_case("now()") => {
            Ok(SqlValue::DateTime(clock.now()))
        }
        DefaultValue::Function(name) => Err(ResolveError::UnsupportedFunction(name.clone())),
    }
}

/// Turns default specs into values, one row at a time.
#[derive(Clone)]
pub struct DefaultValueResolver {
    clock: Arc<dyn Clock>,
}

impl Default for DefaultValueResolver {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl DefaultValueResolver {
    /// Create a resolver reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Resolve a spec, reporting failures. A missing spec is NULL.
    pub fn try_resolve(&self, spec: Option<&DefaultSpec>) -> Result<SqlValue, ResolveError> {
        let Some(spec) = spec else {
            return Ok(SqlValue::Null);
        };
        match spec.parse()? {
            Some(value) => evaluate(&value, self.clock.as_ref()),
            None => Ok(SqlValue::Null),
        }
    }

    /// Resolve a spec; failures are logged and yield NULL for this field only.
    pub fn resolve(&self, field: &str, spec: Option<&DefaultSpec>) -> SqlValue {
        self.try_resolve(spec).unwrap_or_else(|e| {
            warn!("Default for {} could not be resolved: {}", field, e);
            SqlValue::Null
        })
    }
}
