//! Lenient field extraction for snake_case wire rows.
//!
//! Every accessor is total: a missing key, a `null`, or a value of the wrong
//! shape yields `None` instead of an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Text field. Numbers are accepted and rendered as text.
pub fn text(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Boolean field. SQLite integers (`0`/`1`) and `"true"`/`"false"` are accepted.
pub fn flag(row: &Value, key: &str) -> Option<bool> {
    match row.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.as_str() {
            "true" | "t" | "1" => Some(true),
            "false" | "f" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Numeric field. Numeric strings (as returned for `numeric` columns) are accepted.
pub fn number(row: &Value, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Timestamp field, RFC 3339 or `YYYY-MM-DD HH:MM:SS` (assumed UTC).
pub fn timestamp(row: &Value, key: &str) -> Option<DateTime<Utc>> {
    let raw = row.get(key)?.as_str()?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Calendar date field. A full timestamp is truncated to its date.
pub fn date(row: &Value, key: &str) -> Option<NaiveDate> {
    let raw = row.get(key)?.as_str()?;
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// JSON object field that may also arrive serialized as a string.
///
/// Anything that does not decode to an object degrades to `None`.
pub fn embedded_object(row: &Value, key: &str) -> Option<Value> {
    match row.get(key)? {
        Value::Object(_) => row.get(key).cloned(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Object(_)) => Some(parsed),
            Ok(_) => None,
            Err(err) => {
                tracing::debug!(field = key, "Ignoring malformed embedded JSON: {}", err);
                None
            }
        },
        _ => None,
    }
}

/// True when the row is an object carrying every listed key (a `null` value counts).
pub fn has_columns(row: &Value, columns: &[&str]) -> bool {
    match row.as_object() {
        Some(map) => columns.iter().all(|column| map.contains_key(*column)),
        None => false,
    }
}
