//! Query-class operators.
//!
//! Each operator receives the original selector, the value resolved at
//! that selector (which may be a distributed array, or `Missing`), and
//! the user-supplied condition, and answers whether the document
//! matches. Array-valued fields match when any element matches, per the
//! query language's implicit element semantics.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::query::Query;
use crate::registry::{self, OperatorImpl, Registry};
use crate::value::Value;

pub(crate) fn install(reg: &mut Registry) {
    let ops: &[(&str, fn(&str, &Value, &Value) -> Result<bool>)] = &[
        ("$eq", eq),
        ("$ne", ne),
        ("$gt", gt),
        ("$gte", gte),
        ("$lt", lt),
        ("$lte", lte),
        ("$in", in_op),
        ("$nin", nin),
        ("$exists", exists),
        ("$regex", regex_op),
        ("$mod", mod_op),
        ("$size", size),
        ("$all", all),
        ("$elemMatch", elem_match),
        ("$type", type_op),
        ("$not", not),
    ];
    for (name, f) in ops {
        reg.builtin(name, OperatorImpl::Query(Arc::new(*f)));
    }
}

/// Equality with the query language's field semantics: a direct match, a
/// null condition also matching an absent field, or any element of an
/// array-valued field matching.
fn eq_match(lhs: &Value, cond: &Value) -> bool {
    if lhs == cond {
        return true;
    }
    if matches!(cond, Value::Null) && lhs.is_missing() {
        return true;
    }
    match lhs {
        Value::Array(items) => items.iter().any(|v| v == cond),
        _ => false,
    }
}

/// The field value plus, for arrays, each element.
fn candidates(lhs: &Value) -> Vec<&Value> {
    match lhs {
        Value::Array(items) => {
            let mut out: Vec<&Value> = vec![lhs];
            out.extend(items.iter());
            out
        }
        _ => vec![lhs],
    }
}

/// Ordering comparisons only apply between values of the same type
/// class; anything else simply fails to match.
fn compare_match(lhs: &Value, cond: &Value, pred: fn(Ordering) -> bool) -> bool {
    candidates(lhs)
        .into_iter()
        .any(|v| super::types_match(v, cond) && pred(v.compare(cond)))
}

fn eq(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    Ok(eq_match(lhs, cond))
}

fn ne(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    Ok(!eq_match(lhs, cond))
}

fn gt(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    Ok(compare_match(lhs, cond, |o| o == Ordering::Greater))
}

fn gte(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    Ok(compare_match(lhs, cond, |o| o != Ordering::Less))
}

fn lt(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    Ok(compare_match(lhs, cond, |o| o == Ordering::Less))
}

fn lte(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    Ok(compare_match(lhs, cond, |o| o != Ordering::Greater))
}

fn in_match(lhs: &Value, members: &[Value]) -> bool {
    members.iter().any(|m| match m {
        Value::Regex(re) => candidates(lhs)
            .into_iter()
            .any(|v| v.as_str().is_some_and(|s| re.is_match(s))),
        _ => eq_match(lhs, m),
    })
}

fn in_op(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    let members = cond
        .as_array()
        .ok_or_else(|| Error::Query("$in: expected an array argument".to_string()))?;
    Ok(in_match(lhs, members))
}

fn nin(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    let members = cond
        .as_array()
        .ok_or_else(|| Error::Query("$nin: expected an array argument".to_string()))?;
    Ok(!in_match(lhs, members))
}

fn exists(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    Ok(cond.is_truthy() != lhs.is_missing())
}

fn regex_op(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    let re = match cond {
        Value::Regex(re) => re.clone(),
        Value::String(pattern) => regex::Regex::new(pattern)
            .map_err(|e| Error::Query(format!("$regex: invalid pattern: {}", e)))?,
        other => {
            return Err(Error::Query(format!(
                "$regex: expected a regex or string, got {}",
                other.type_name()
            )));
        }
    };
    Ok(candidates(lhs)
        .into_iter()
        .any(|v| v.as_str().is_some_and(|s| re.is_match(s))))
}

fn mod_op(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    let args = cond
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| Error::Query("$mod: expected [divisor, remainder]".to_string()))?;
    let (Some(div), Some(rem)) = (args[0].as_i64(), args[1].as_i64()) else {
        return Err(Error::Query("$mod: divisor and remainder must be integers".to_string()));
    };
    if div == 0 {
        return Err(Error::Query("$mod: divisor must be non-zero".to_string()));
    }
    Ok(candidates(lhs)
        .into_iter()
        .any(|v| v.as_i64().is_some_and(|n| n % div == rem)))
}

fn size(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    let n = cond
        .as_i64()
        .ok_or_else(|| Error::Query("$size: expected an integer argument".to_string()))?;
    Ok(lhs.as_array().is_some_and(|arr| arr.len() as i64 == n))
}

fn all(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    let members = cond
        .as_array()
        .ok_or_else(|| Error::Query("$all: expected an array argument".to_string()))?;
    if members.is_empty() {
        return Ok(false);
    }
    Ok(members.iter().all(|m| match m {
        Value::Regex(re) => candidates(lhs)
            .into_iter()
            .any(|v| v.as_str().is_some_and(|s| re.is_match(s))),
        _ => eq_match(lhs, m),
    }))
}

/// Does one array element satisfy the given criteria? A criteria object
/// made purely of operator keys applies to the element itself; anything
/// else compiles as a nested query over element documents.
fn elem_match(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    let Some(items) = lhs.as_array() else {
        return Ok(false);
    };
    let criteria = cond
        .as_object()
        .ok_or_else(|| Error::Query("$elemMatch: expected an object argument".to_string()))?;
    let operator_form = !criteria.is_empty() && criteria.keys().all(|k| k.starts_with('$'));
    if operator_form {
        for item in items {
            let mut matched = true;
            for (op, arg) in criteria {
                let f = registry::lookup_query(op)
                    .ok_or_else(|| Error::Query(format!("$elemMatch: unknown operator {}", op)))?;
                if !f("", item, arg)? {
                    matched = false;
                    break;
                }
            }
            if matched {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    let query = Query::new(cond.clone())?;
    for item in items {
        if query.test(item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Numeric type codes accepted by `$type`, per the BSON convention.
fn type_code_name(code: i64) -> Option<&'static str> {
    match code {
        1 => Some("double"),
        2 => Some("string"),
        3 => Some("object"),
        4 => Some("array"),
        8 => Some("bool"),
        9 => Some("date"),
        10 => Some("null"),
        11 => Some("regex"),
        16 => Some("int"),
        18 => Some("long"),
        _ => None,
    }
}

fn type_matches(lhs: &Value, spec: &Value) -> Result<bool> {
    let actual = super::expression::bson_type_name(lhs);
    let name = match spec {
        Value::String(s) => s.clone(),
        Value::Int(code) => type_code_name(*code)
            .ok_or_else(|| Error::Query(format!("$type: unknown type code {}", code)))?
            .to_string(),
        other => {
            return Err(Error::Query(format!(
                "$type: expected a string or integer, got {}",
                other.type_name()
            )));
        }
    };
    if name == "number" {
        return Ok(matches!(actual, "int" | "long" | "double"));
    }
    Ok(actual == name)
}

fn type_op(_sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    match cond {
        Value::Array(specs) => {
            for spec in specs {
                if type_matches(lhs, spec)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        spec => type_matches(lhs, spec),
    }
}

fn not(sel: &str, lhs: &Value, cond: &Value) -> Result<bool> {
    match cond {
        Value::Regex(_) => Ok(!regex_op(sel, lhs, cond)?),
        Value::Object(ops) => {
            for (op, arg) in ops {
                let f = registry::lookup_query(op)
                    .ok_or_else(|| Error::Query(format!("$not: unknown operator {}", op)))?;
                if f(sel, lhs, arg)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        other => Err(Error::Query(format!(
            "$not: expected a regex or operator object, got {}",
            other.type_name()
        ))),
    }
}
