//! Defensive field access over flat firmware key/value blocks
//!
//! Firmware revisions disagree on field names and value types. Every helper
//! here is total: a missing or malformed value yields `None`, never an error.

use serde_json::{Map, Value};

/// A flat key/value object as found in `STATS`, `VERSION` and `POOLS` arrays
pub type Block = Map<String, Value>;

/// Strings accepted as `true` by [`to_bool`] (compared case-insensitively)
const TRUTHY: &[&str] = &["1", "true", "yes", "y", "on", "alive"];

/// Coerce to a finite float from a JSON number or numeric string
pub fn to_f64(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// Coerce to an integer; floats and float strings truncate toward zero
pub fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| n.as_f64().and_then(truncate)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
        }
        _ => None,
    }
}

fn truncate(v: f64) -> Option<i64> {
    if v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Some(v.trunc() as i64)
    } else {
        None
    }
}

/// Coerce to a boolean.
///
/// Booleans pass through, numbers are true when non-zero, strings are true
/// when they are one of a small truthy set (including `"alive"`) and false
/// otherwise. Anything else is absent.
pub fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => {
            let s = s.trim();
            Some(TRUTHY.iter().any(|t| t.eq_ignore_ascii_case(s)))
        }
        _ => None,
    }
}

/// Non-empty text; numbers are rendered as they appear on the wire
pub fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Render any scalar as firmware text without re-parsing it
pub fn to_display(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Try each key in order; the first one that is present and coerces wins
pub fn first<T>(block: &Block, keys: &[&str], coerce: fn(&Value) -> Option<T>) -> Option<T> {
    keys.iter()
        .filter_map(|k| block.get(*k))
        .find_map(coerce)
}

pub fn first_f64(block: &Block, keys: &[&str]) -> Option<f64> {
    first(block, keys, to_f64)
}

pub fn first_i64(block: &Block, keys: &[&str]) -> Option<i64> {
    first(block, keys, to_i64)
}

pub fn first_text(block: &Block, keys: &[&str]) -> Option<String> {
    first(block, keys, to_text)
}

/// First key that is present at all decides; its value is then coerced.
///
/// Used where firmware presence of a key is the signal (e.g. the
/// stratum-active flag), so a present-but-unparseable value stays absent
/// instead of falling through to the next alias.
pub fn first_present<T>(block: &Block, keys: &[&str], coerce: fn(&Value) -> Option<T>) -> Option<T> {
    keys.iter()
        .find_map(|k| block.get(*k))
        .and_then(coerce)
}

/// Borrow a named result array (e.g. `STATS`) out of a response object
pub fn result_array<'a>(response: &'a Value, name: &str) -> &'a [Value] {
    response
        .get(name)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
