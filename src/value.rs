use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// A document value used throughout the nutmeg query engine.
///
/// This type represents all value kinds the query language can observe,
/// with a distinction between integers and floats (unlike standard JSON
/// which only has "number") and three members JSON does not have: dates,
/// regular expressions, and the `Missing` sentinel.
///
/// # Missing vs Null
///
/// `Missing` means "no value exists at this path" and is distinct from an
/// explicit `null`. Resolving an absent field yields `Missing`; `Missing`
/// never appears in a structure returned to the caller (object fields and
/// array elements holding it are dropped on output).
///
/// # Type Preservation
///
/// The engine preserves the distinction between integers and floats:
/// arithmetic operators keep integer results when the computation is
/// mathematically exact, falling back to floats otherwise.
///
/// # Examples
///
/// ```
/// use nutmeg::Value;
///
/// let doc = Value::object([
///     ("name", Value::from("amy")),
///     ("age", Value::Int(31)),
/// ]);
/// assert!(doc.is_truthy());
/// assert_eq!(Value::Int(1), Value::Float(1.0));
/// ```
#[derive(Debug, Clone)]
pub enum Value {
    /// Explicit null
    Null,

    /// Absent field sentinel, never part of caller-visible output
    Missing,

    /// Boolean (true/false)
    Bool(bool),

    /// Integer number (preserved separately from floats)
    Int(i64),

    /// Floating-point number
    Float(f64),

    /// UTF-8 string
    String(String),

    /// Point in time, UTC
    Date(DateTime<Utc>),

    /// Compiled regular expression
    Regex(regex::Regex),

    /// Array of values
    Array(Vec<Value>),

    /// Object with string keys
    Object(Map),
}

/// Object representation shared by documents and nested values.
///
/// Insertion-ordered so that sort-key declaration order and output field
/// order survive; equality ignores order.
pub type Map = IndexMap<String, Value>;

/// Relative order of value kinds, the first sort criterion.
///
/// Follows the BSON comparison order: missing and null sort before
/// everything, then numbers, strings, objects, arrays, booleans, dates
/// and regexes.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Missing => 0,
        Value::Null => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::String(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
        Value::Bool(_) => 6,
        Value::Date(_) => 7,
        Value::Regex(_) => 8,
    }
}

impl Value {
    /// Build an object value from key/value pairs.
    pub fn object<K, I>(pairs: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Truthiness for conditions: null, missing, `false` and numeric zero
    /// are falsy; everything else (including `""` and `[]`) is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null | Value::Missing => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            _ => true,
        }
    }

    /// True for both `Null` and `Missing`.
    ///
    /// Numeric and date operators propagate nil input as `Null` rather
    /// than raising a type error.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Null | Value::Missing)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Numeric view, widening integers to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Integer view. Floats convert only when they are whole numbers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Missing => "missing",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "double",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Regex(_) => "regex",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Total order over values: type rank first, then within-type order.
    ///
    /// Numbers compare across the int/float split; `NaN` sorts before all
    /// other numbers and equals itself. Objects compare by their sorted
    /// key/value pairs, arrays lexicographically.
    pub fn compare(&self, other: &Value) -> Ordering {
        let (ra, rb) = (type_rank(self), type_rank(other));
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Value::Null, Value::Null) | (Value::Missing, Value::Missing) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Regex(a), Value::Regex(b)) => a.as_str().cmp(b.as_str()),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.compare(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Object(a), Value::Object(b)) => {
                let mut ka: Vec<_> = a.iter().collect();
                let mut kb: Vec<_> = b.iter().collect();
                ka.sort_by(|x, y| x.0.cmp(y.0));
                kb.sort_by(|x, y| x.0.cmp(y.0));
                for ((k1, v1), (k2, v2)) in ka.iter().zip(kb.iter()) {
                    let ord = k1.cmp(k2).then_with(|| v1.compare(v2));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                ka.len().cmp(&kb.len())
            }
            (a, b) => {
                // Both numeric at this point
                let x = a.as_f64().unwrap_or(f64::NAN);
                let y = b.as_f64().unwrap_or(f64::NAN);
                match (x.is_nan(), y.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                }
            }
        }
    }
}

/// Structural equality with cross-type numeric comparison.
///
/// `Int(1)` equals `Float(1.0)`, `NaN` equals `NaN`, `0.0` equals `-0.0`.
/// Regexes compare by source pattern. Object key order is irrelevant,
/// array order is significant.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) | (Value::Missing, Value::Missing) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a.as_str() == b.as_str(),
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => {
                let x = a.as_f64().unwrap_or(f64::NAN);
                let y = b.as_f64().unwrap_or(f64::NAN);
                (x.is_nan() && y.is_nan()) || x == y
            }
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Value {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Value {
        Value::Int(n as i64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Value {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(arr: Vec<Value>) -> Value {
        Value::Array(arr)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Value {
        Value::Date(dt)
    }
}
