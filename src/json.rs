//! Interop with `serde_json` at the crate boundary.
//!
//! Callers usually hold `serde_json::Value` documents; the engine works on
//! its own [`Value`] which additionally models dates, regexes and the
//! missing sentinel. Conversion in is lossless; conversion out renders
//! dates as RFC 3339 strings, regexes as their pattern source, and drops
//! `Missing` entries entirely.

use crate::value::Value;

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => Value::Object(
                obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

impl Value {
    /// Render as a `serde_json::Value`, dropping `Missing` members.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Missing => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(n) => serde_json::Value::from(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Value::Regex(re) => serde_json::Value::String(re.as_str().to_string()),
            Value::Array(arr) => serde_json::Value::Array(
                arr.iter()
                    .filter(|v| !v.is_missing())
                    .map(Value::to_json)
                    .collect(),
            ),
            Value::Object(obj) => serde_json::Value::Object(
                obj.iter()
                    .filter(|(_, v)| !v.is_missing())
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Convert a slice of `serde_json` documents into engine values.
pub fn from_json_slice(docs: &[serde_json::Value]) -> Vec<Value> {
    docs.iter().cloned().map(Value::from).collect()
}
