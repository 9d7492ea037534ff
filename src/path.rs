//! Dot-path selector resolution.
//!
//! A selector like `"a.b.2.c"` addresses a location inside a document.
//! Numeric segments index arrays; a non-numeric segment applied to an
//! array distributes the remaining path over every element, collecting
//! the non-missing results into a new array. Distribution happens at most
//! once per position: a sub-path that begins on an array after an earlier
//! distribution stops walking and yields the element as-is.

use crate::value::{Map, Value};

/// Parse a purely-numeric path segment as an array index.
fn as_index(seg: &str) -> Option<usize> {
    if !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()) {
        seg.parse().ok()
    } else {
        None
    }
}

/// Single-step lookup: object key, or array element for numeric segments.
fn get_value(value: &Value, seg: &str) -> Value {
    match value {
        Value::Object(map) => map.get(seg).cloned().unwrap_or(Value::Missing),
        Value::Array(arr) => match as_index(seg) {
            Some(i) => arr.get(i).cloned().unwrap_or(Value::Missing),
            None => Value::Missing,
        },
        _ => Value::Missing,
    }
}

/// Resolve a selector against a document, yielding `Missing` for absent
/// paths.
///
/// # Examples
///
/// ```
/// use nutmeg::{path, Value};
///
/// let doc = Value::object([(
///     "items",
///     Value::Array(vec![
///         Value::object([("price", Value::Int(5))]),
///         Value::object([("price", Value::Int(9))]),
///     ]),
/// )]);
/// assert_eq!(
///     path::resolve(&doc, "items.price"),
///     Value::Array(vec![Value::Int(5), Value::Int(9)]),
/// );
/// assert_eq!(path::resolve(&doc, "items.0.price"), Value::Int(5));
/// assert_eq!(path::resolve(&doc, "items.label"), Value::Array(vec![]));
/// assert_eq!(path::resolve(&doc, "nope"), Value::Missing);
/// ```
pub fn resolve(doc: &Value, selector: &str) -> Value {
    resolve_with_depth(doc, selector).0
}

/// Resolve a selector and report how many implicit array distributions
/// occurred along the way.
///
/// Callers that need a scalar out of single-element wrapper arrays pass
/// the depth to [`unwrap`].
pub fn resolve_with_depth(doc: &Value, selector: &str) -> (Value, usize) {
    let segs: Vec<&str> = selector.split('.').collect();
    let mut depth = 0;
    let value = walk(doc, &segs, &mut depth);
    (value, depth)
}

fn walk(start: &Value, path: &[&str], depth: &mut usize) -> Value {
    let mut value = start.clone();
    let mut i = 0;
    while i < path.len() {
        let seg = path[i];
        let numeric = as_index(seg).is_some();
        if let Value::Array(arr) = &value
            && !numeric
        {
            // A sub-path landing on an array right after a distribution
            // stops here; re-distributing would double-flatten.
            if i == 0 && *depth > 0 {
                break;
            }
            *depth += 1;
            let subpath = &path[i..];
            let mut collected = Vec::new();
            for item in arr {
                let v = walk(item, subpath, depth);
                if !v.is_missing() {
                    collected.push(v);
                }
            }
            return Value::Array(collected);
        }
        value = get_value(&value, seg);
        if value.is_missing() {
            break;
        }
        i += 1;
    }
    value
}

/// Peel up to `depth` single-element array wrappers produced by implicit
/// distribution.
pub fn unwrap(mut value: Value, depth: usize) -> Value {
    for _ in 0..depth {
        match value {
            Value::Array(ref arr) if arr.len() == 1 => {
                value = arr[0].clone();
            }
            _ => break,
        }
    }
    value
}

/// Write a value at a selector, creating intermediate objects as needed.
///
/// A non-numeric segment meeting an array writes into every element.
/// Writing through a scalar intermediate is a no-op.
pub fn set_value(target: &mut Value, selector: &str, value: Value) {
    let segs: Vec<&str> = selector.split('.').collect();
    set_walk(target, &segs, &value);
}

fn set_walk(current: &mut Value, segs: &[&str], value: &Value) {
    let seg = segs[0];
    let index = as_index(seg);
    if segs.len() == 1 {
        match current {
            Value::Object(map) => {
                map.insert(seg.to_string(), value.clone());
            }
            Value::Array(arr) => match index {
                Some(i) => {
                    if i < arr.len() {
                        arr[i] = value.clone();
                    } else {
                        // Pad with nulls up to the target index
                        while arr.len() < i {
                            arr.push(Value::Null);
                        }
                        arr.push(value.clone());
                    }
                }
                None => {
                    for item in arr.iter_mut() {
                        set_walk(item, segs, value);
                    }
                }
            },
            _ => {}
        }
        return;
    }
    match current {
        Value::Object(map) => {
            let child = map
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            set_walk(child, &segs[1..], value);
        }
        Value::Array(arr) => match index {
            Some(i) => {
                if let Some(child) = arr.get_mut(i) {
                    set_walk(child, &segs[1..], value);
                }
            }
            None => {
                for item in arr.iter_mut() {
                    set_walk(item, segs, value);
                }
            }
        },
        _ => {}
    }
}

/// Remove the value at a selector. Silent no-op for absent paths.
pub fn remove_value(target: &mut Value, selector: &str) {
    let segs: Vec<&str> = selector.split('.').collect();
    remove_walk(target, &segs);
}

fn remove_walk(current: &mut Value, segs: &[&str]) {
    let seg = segs[0];
    let index = as_index(seg);
    if segs.len() == 1 {
        match current {
            Value::Object(map) => {
                map.shift_remove(seg);
            }
            Value::Array(arr) => match index {
                Some(i) => {
                    if i < arr.len() {
                        arr.remove(i);
                    }
                }
                None => {
                    for item in arr.iter_mut() {
                        remove_walk(item, segs);
                    }
                }
            },
            _ => {}
        }
        return;
    }
    match current {
        Value::Object(map) => {
            if let Some(child) = map.get_mut(seg) {
                remove_walk(child, &segs[1..]);
            }
        }
        Value::Array(arr) => match index {
            Some(i) => {
                if let Some(child) = arr.get_mut(i) {
                    remove_walk(child, &segs[1..]);
                }
            }
            None => {
                for item in arr.iter_mut() {
                    remove_walk(item, segs);
                }
            }
        },
        _ => {}
    }
}

/// Build the minimal sub-document containing only the selector's path.
///
/// Used by `$project` inclusion: `resolve_obj({a:{b:1,c:2}}, "a.b")`
/// yields `{a:{b:1}}`. Arrays keep their shape: elements missing the
/// path become empty objects (or `Missing` markers when
/// `preserve_missing` is set, for later merge alignment). Returns
/// `Missing` when the path resolves to nothing at all.
pub fn resolve_obj(doc: &Value, selector: &str, preserve_missing: bool) -> Value {
    let segs: Vec<&str> = selector.split('.').collect();
    obj_walk(doc, &segs, preserve_missing)
}

fn obj_walk(value: &Value, segs: &[&str], preserve_missing: bool) -> Value {
    match value {
        Value::Object(map) => {
            let key = segs[0];
            let Some(child) = map.get(key) else {
                return Value::Missing;
            };
            let inner = if segs.len() == 1 {
                child.clone()
            } else {
                let sub = obj_walk(child, &segs[1..], preserve_missing);
                if sub.is_missing() {
                    return Value::Missing;
                }
                sub
            };
            Value::object([(key, inner)])
        }
        Value::Array(arr) => {
            if let Some(i) = as_index(segs[0]) {
                let Some(elem) = arr.get(i) else {
                    return Value::Missing;
                };
                let inner = if segs.len() == 1 {
                    elem.clone()
                } else {
                    let sub = obj_walk(elem, &segs[1..], preserve_missing);
                    if sub.is_missing() {
                        return Value::Missing;
                    }
                    sub
                };
                return Value::Array(vec![inner]);
            }
            let mut out = Vec::new();
            let mut any = false;
            for elem in arr {
                let sub = obj_walk(elem, segs, preserve_missing);
                if sub.is_missing() {
                    if preserve_missing {
                        out.push(Value::Missing);
                    } else if elem.as_object().is_some() {
                        out.push(Value::Object(Map::new()));
                    }
                } else {
                    any = true;
                    out.push(sub);
                }
            }
            if any { Value::Array(out) } else { Value::Missing }
        }
        _ => Value::Missing,
    }
}

/// Deep merge `src` into `target`.
///
/// Objects merge per key, arrays merge pairwise by index (preserving the
/// alignment `resolve_obj` produced), and `Missing` in `src` leaves the
/// target untouched. Anything else replaces the target.
pub fn merge(target: &mut Value, src: Value) {
    match (target, src) {
        (_, Value::Missing) => {}
        (Value::Object(dst), Value::Object(src)) => {
            for (k, v) in src {
                match dst.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        dst.insert(k, v);
                    }
                }
            }
        }
        (Value::Array(dst), Value::Array(src)) => {
            for (i, v) in src.into_iter().enumerate() {
                if i < dst.len() {
                    merge(&mut dst[i], v);
                } else {
                    dst.push(v);
                }
            }
        }
        (slot, src) => *slot = src,
    }
}
