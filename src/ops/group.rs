//! Group-class accumulators.
//!
//! Each accumulator reduces the per-document computed values of one
//! group to a single summary value. Non-numeric input is skipped by the
//! numeric accumulators rather than raising, matching the forgiving
//! aggregation semantics of the query language.

use std::collections::HashSet;
use std::sync::Arc;

use super::arith;
use crate::codec;
use crate::error::{Error, Result};
use crate::registry::{OperatorImpl, Registry};
use crate::value::{Map, Value};

pub(crate) fn install(reg: &mut Registry) {
    let ops: &[(&str, fn(&[Value]) -> Result<Value>)] = &[
        ("$sum", sum),
        ("$avg", avg),
        ("$min", min),
        ("$max", max),
        ("$first", first),
        ("$last", last),
        ("$push", push),
        ("$addToSet", add_to_set),
        ("$count", count),
        ("$mergeObjects", merge_objects),
        ("$stdDevPop", std_dev_pop),
        ("$stdDevSamp", std_dev_samp),
    ];
    for (name, f) in ops {
        reg.builtin(name, OperatorImpl::Group(Arc::new(*f)));
    }
}

fn sum(values: &[Value]) -> Result<Value> {
    let mut acc = Value::Int(0);
    for v in values {
        if v.is_number() {
            acc = arith("$sum", &acc, v, i64::checked_add, |a, b| a + b, |a, b| a + b)?;
        }
    }
    Ok(acc)
}

fn avg(values: &[Value]) -> Result<Value> {
    let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
    if numbers.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::Float(
        numbers.iter().sum::<f64>() / numbers.len() as f64,
    ))
}

fn min(values: &[Value]) -> Result<Value> {
    Ok(values
        .iter()
        .filter(|v| !v.is_nil())
        .cloned()
        .reduce(|a, b| if b.compare(&a).is_lt() { b } else { a })
        .unwrap_or(Value::Null))
}

fn max(values: &[Value]) -> Result<Value> {
    Ok(values
        .iter()
        .filter(|v| !v.is_nil())
        .cloned()
        .reduce(|a, b| if b.compare(&a).is_gt() { b } else { a })
        .unwrap_or(Value::Null))
}

fn first(values: &[Value]) -> Result<Value> {
    Ok(values.first().cloned().unwrap_or(Value::Missing))
}

fn last(values: &[Value]) -> Result<Value> {
    Ok(values.last().cloned().unwrap_or(Value::Missing))
}

fn push(values: &[Value]) -> Result<Value> {
    Ok(Value::Array(
        values.iter().filter(|v| !v.is_missing()).cloned().collect(),
    ))
}

/// Deduplicates via the canonical encoding, keeping first-seen order.
fn add_to_set(values: &[Value]) -> Result<Value> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for v in values {
        if v.is_missing() {
            continue;
        }
        if seen.insert(codec::encode(v)) {
            out.push(v.clone());
        }
    }
    Ok(Value::Array(out))
}

fn count(values: &[Value]) -> Result<Value> {
    Ok(Value::Int(values.len() as i64))
}

fn merge_objects(values: &[Value]) -> Result<Value> {
    let mut out = Map::new();
    for v in values {
        match v {
            Value::Null | Value::Missing => {}
            Value::Object(obj) => out.extend(obj.clone()),
            other => {
                return Err(Error::Type(format!(
                    "$mergeObjects: expected objects, got {}",
                    other.type_name()
                )));
            }
        }
    }
    Ok(Value::Object(out))
}

fn variance(values: &[Value], sample: bool) -> Option<f64> {
    let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
    let n = numbers.len();
    if n == 0 || (sample && n < 2) {
        return None;
    }
    let mean = numbers.iter().sum::<f64>() / n as f64;
    let sq = numbers.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>();
    let denom = if sample { n - 1 } else { n };
    Some(sq / denom as f64)
}

fn std_dev_pop(values: &[Value]) -> Result<Value> {
    Ok(variance(values, false)
        .map(|v| Value::Float(v.sqrt()))
        .unwrap_or(Value::Null))
}

fn std_dev_samp(values: &[Value]) -> Result<Value> {
    Ok(variance(values, true)
        .map(|v| Value::Float(v.sqrt()))
        .unwrap_or(Value::Null))
}
