//! Expression-class operators.
//!
//! Every operator receives its argument expression unevaluated together
//! with the current document and evaluation context, so conditional and
//! variable-binding operators control exactly what gets evaluated.
//! Numeric operators propagate nil input as `Null` instead of failing;
//! genuine type and arity violations are errors.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::sync::Arc;

use super::{arith, eval, eval_args, eval_array};
use crate::codec;
use crate::error::{Error, Result};
use crate::eval::{EvalContext, compute_value};
use crate::registry::{OperatorImpl, Registry};
use crate::value::{Map, Value};

pub(crate) fn install(reg: &mut Registry) {
    let ops: &[(&str, fn(&Value, &Value, &EvalContext) -> Result<Value>)] = &[
        ("$abs", abs),
        ("$add", add),
        ("$ceil", ceil),
        ("$divide", divide),
        ("$exp", exp),
        ("$floor", floor),
        ("$ln", ln),
        ("$log10", log10),
        ("$mod", modulo),
        ("$multiply", multiply),
        ("$pow", pow),
        ("$round", round),
        ("$sqrt", sqrt),
        ("$subtract", subtract),
        ("$trunc", trunc),
        ("$cmp", cmp),
        ("$eq", eq),
        ("$ne", ne),
        ("$gt", gt),
        ("$gte", gte),
        ("$lt", lt),
        ("$lte", lte),
        ("$and", and),
        ("$or", or),
        ("$not", not),
        ("$cond", cond),
        ("$ifNull", if_null),
        ("$switch", switch),
        ("$arrayElemAt", array_elem_at),
        ("$arrayToObject", array_to_object),
        ("$concatArrays", concat_arrays),
        ("$filter", filter),
        ("$in", in_array),
        ("$indexOfArray", index_of_array),
        ("$isArray", is_array),
        ("$map", map),
        ("$range", range),
        ("$reduce", reduce),
        ("$reverseArray", reverse_array),
        ("$size", size),
        ("$slice", slice),
        ("$zip", zip),
        ("$mergeObjects", merge_objects),
        ("$objectToArray", object_to_array),
        ("$setUnion", set_union),
        ("$setIntersection", set_intersection),
        ("$setDifference", set_difference),
        ("$setEquals", set_equals),
        ("$setIsSubset", set_is_subset),
        ("$allElementsTrue", all_elements_true),
        ("$anyElementTrue", any_element_true),
        ("$concat", concat),
        ("$indexOfCP", index_of_cp),
        ("$split", split),
        ("$strcasecmp", strcasecmp),
        ("$strLenCP", str_len_cp),
        ("$substrCP", substr_cp),
        ("$toLower", to_lower),
        ("$toUpper", to_upper),
        ("$trim", trim),
        ("$ltrim", ltrim),
        ("$rtrim", rtrim),
        ("$year", year),
        ("$month", month),
        ("$dayOfMonth", day_of_month),
        ("$hour", hour),
        ("$minute", minute),
        ("$second", second),
        ("$millisecond", millisecond),
        ("$dayOfWeek", day_of_week),
        ("$dayOfYear", day_of_year),
        ("$dateToString", date_to_string),
        ("$type", type_of),
        ("$convert", convert),
        ("$toBool", to_bool),
        ("$toDouble", to_double),
        ("$toInt", to_int),
        ("$toLong", to_long),
        ("$toString", to_string),
        ("$toDate", to_date),
        ("$literal", literal),
        ("$let", let_bind),
    ];
    for (name, f) in ops {
        reg.builtin(name, OperatorImpl::Expression(Arc::new(*f)));
    }
}

// ---- arithmetic ----

fn unary_number(doc: &Value, args: &Value, ctx: &EvalContext, op: &str) -> Result<Option<Value>> {
    let v = match eval(doc, args, ctx)? {
        Value::Array(items) if items.len() == 1 => items[0].clone(),
        v => v,
    };
    if v.is_nil() {
        return Ok(None);
    }
    if !v.is_number() {
        return Err(Error::Type(format!(
            "{}: expected a number, got {}",
            op,
            v.type_name()
        )));
    }
    Ok(Some(v))
}

fn abs(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    Ok(match unary_number(doc, args, ctx, "$abs")? {
        None => Value::Null,
        Some(Value::Int(n)) => Value::Int(n.abs()),
        Some(v) => Value::Float(v.as_f64().unwrap_or(f64::NAN).abs()),
    })
}

fn add(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_array(doc, args, ctx, "$add")?;
    let mut date: Option<DateTime<Utc>> = None;
    let mut acc = Value::Int(0);
    for item in &items {
        if item.is_nil() {
            return Ok(Value::Null);
        }
        if let Value::Date(dt) = item {
            if date.is_some() {
                return Err(Error::Type("$add: only one date argument allowed".to_string()));
            }
            date = Some(*dt);
            continue;
        }
        acc = arith("$add", &acc, item, i64::checked_add, |a, b| a + b, |a, b| a + b)?;
    }
    match date {
        Some(dt) => {
            let millis = acc.as_f64().unwrap_or(0.0) as i64;
            DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis() + millis)
                .map(Value::Date)
                .ok_or_else(|| Error::Type("$add: date out of range".to_string()))
        }
        None => Ok(acc),
    }
}

fn subtract(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_args(doc, args, ctx, "$subtract", 2)?;
    match (&items[0], &items[1]) {
        (Value::Date(a), Value::Date(b)) => {
            Ok(Value::Int(a.timestamp_millis() - b.timestamp_millis()))
        }
        (Value::Date(a), b) if b.is_number() => {
            let millis = b.as_f64().unwrap_or(0.0) as i64;
            DateTime::<Utc>::from_timestamp_millis(a.timestamp_millis() - millis)
                .map(Value::Date)
                .ok_or_else(|| Error::Type("$subtract: date out of range".to_string()))
        }
        (a, b) => arith("$subtract", a, b, i64::checked_sub, |x, y| x - y, |x, y| x - y),
    }
}

fn multiply(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_array(doc, args, ctx, "$multiply")?;
    let mut acc = Value::Int(1);
    for item in &items {
        if item.is_nil() {
            return Ok(Value::Null);
        }
        acc = arith("$multiply", &acc, item, i64::checked_mul, |a, b| a * b, |a, b| a * b)?;
    }
    Ok(acc)
}

fn divide(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_args(doc, args, ctx, "$divide", 2)?;
    if items[0].is_nil() || items[1].is_nil() {
        return Ok(Value::Null);
    }
    if items[1].as_f64() == Some(0.0) {
        return Err(Error::Type("$divide: cannot divide by zero".to_string()));
    }
    match (&items[0], &items[1]) {
        (Value::Int(a), Value::Int(b)) if a % b == 0 => Ok(Value::Int(a / b)),
        (a, b) => arith("$divide", a, b, |_, _| None, |x, y| x / y, |x, y| x / y),
    }
}

fn modulo(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_args(doc, args, ctx, "$mod", 2)?;
    if items[0].is_nil() || items[1].is_nil() {
        return Ok(Value::Null);
    }
    if items[1].as_f64() == Some(0.0) {
        return Err(Error::Type("$mod: cannot mod by zero".to_string()));
    }
    arith("$mod", &items[0], &items[1], i64::checked_rem, |x, y| x % y, |x, y| x % y)
}

fn ceil(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    Ok(match unary_number(doc, args, ctx, "$ceil")? {
        None => Value::Null,
        Some(Value::Int(n)) => Value::Int(n),
        Some(v) => Value::Float(v.as_f64().unwrap_or(f64::NAN).ceil()),
    })
}

fn floor(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    Ok(match unary_number(doc, args, ctx, "$floor")? {
        None => Value::Null,
        Some(Value::Int(n)) => Value::Int(n),
        Some(v) => Value::Float(v.as_f64().unwrap_or(f64::NAN).floor()),
    })
}

fn trunc(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    Ok(match unary_number(doc, args, ctx, "$trunc")? {
        None => Value::Null,
        Some(Value::Int(n)) => Value::Int(n),
        Some(v) => Value::Float(v.as_f64().unwrap_or(f64::NAN).trunc()),
    })
}

fn round(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_array(doc, args, ctx, "$round")?;
    if items.is_empty() || items.len() > 2 {
        return Err(Error::Type("$round: expected 1 or 2 arguments".to_string()));
    }
    if items[0].is_nil() {
        return Ok(Value::Null);
    }
    let place = match items.get(1) {
        Some(p) => p
            .as_i64()
            .ok_or_else(|| Error::Type("$round: place must be an integer".to_string()))?,
        None => 0,
    };
    let n = items[0]
        .as_f64()
        .ok_or_else(|| Error::Type(format!("$round: expected a number, got {}", items[0].type_name())))?;
    let factor = 10f64.powi(place as i32);
    let rounded = (n * factor).round() / factor;
    Ok(match &items[0] {
        Value::Int(_) if place >= 0 => Value::Int(rounded as i64),
        _ if rounded.fract() == 0.0 && place <= 0 => Value::Int(rounded as i64),
        _ => Value::Float(rounded),
    })
}

fn sqrt(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    match unary_number(doc, args, ctx, "$sqrt")? {
        None => Ok(Value::Null),
        Some(v) => {
            let n = v.as_f64().unwrap_or(f64::NAN);
            if n < 0.0 {
                return Err(Error::Type("$sqrt: argument must be non-negative".to_string()));
            }
            Ok(Value::Float(n.sqrt()))
        }
    }
}

fn pow(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_args(doc, args, ctx, "$pow", 2)?;
    if items[0].is_nil() || items[1].is_nil() {
        return Ok(Value::Null);
    }
    let (base, exp) = (&items[0], &items[1]);
    if !base.is_number() || !exp.is_number() {
        return Err(Error::Type("$pow: both arguments must be numbers".to_string()));
    }
    if base.as_f64() == Some(0.0) && exp.as_f64().is_some_and(|e| e < 0.0) {
        return Err(Error::Type(
            "$pow: zero cannot be raised to a negative exponent".to_string(),
        ));
    }
    if let (Value::Int(b), Value::Int(e)) = (base, exp)
        && *e >= 0
        && *e <= u32::MAX as i64
        && let Some(n) = b.checked_pow(*e as u32)
    {
        return Ok(Value::Int(n));
    }
    Ok(Value::Float(
        base.as_f64().unwrap_or(f64::NAN).powf(exp.as_f64().unwrap_or(f64::NAN)),
    ))
}

fn exp(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    Ok(match unary_number(doc, args, ctx, "$exp")? {
        None => Value::Null,
        Some(v) => Value::Float(v.as_f64().unwrap_or(f64::NAN).exp()),
    })
}

fn ln(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    match unary_number(doc, args, ctx, "$ln")? {
        None => Ok(Value::Null),
        Some(v) => {
            let n = v.as_f64().unwrap_or(f64::NAN);
            if n <= 0.0 {
                return Err(Error::Type("$ln: argument must be a positive number".to_string()));
            }
            Ok(Value::Float(n.ln()))
        }
    }
}

fn log10(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    match unary_number(doc, args, ctx, "$log10")? {
        None => Ok(Value::Null),
        Some(v) => {
            let n = v.as_f64().unwrap_or(f64::NAN);
            if n <= 0.0 {
                return Err(Error::Type("$log10: argument must be a positive number".to_string()));
            }
            Ok(Value::Float(n.log10()))
        }
    }
}

// ---- comparison ----

fn compare_pair(
    doc: &Value,
    args: &Value,
    ctx: &EvalContext,
    op: &str,
) -> Result<(Value, Value)> {
    let mut items = eval_args(doc, args, ctx, op, 2)?;
    let b = items.pop().unwrap_or(Value::Null);
    let a = items.pop().unwrap_or(Value::Null);
    Ok((a, b))
}

fn cmp(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let (a, b) = compare_pair(doc, args, ctx, "$cmp")?;
    Ok(Value::Int(match a.compare(&b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

fn eq(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let (a, b) = compare_pair(doc, args, ctx, "$eq")?;
    Ok(Value::Bool(a == b))
}

fn ne(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let (a, b) = compare_pair(doc, args, ctx, "$ne")?;
    Ok(Value::Bool(a != b))
}

fn gt(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let (a, b) = compare_pair(doc, args, ctx, "$gt")?;
    Ok(Value::Bool(a.compare(&b) == Ordering::Greater))
}

fn gte(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let (a, b) = compare_pair(doc, args, ctx, "$gte")?;
    Ok(Value::Bool(a.compare(&b) != Ordering::Less))
}

fn lt(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let (a, b) = compare_pair(doc, args, ctx, "$lt")?;
    Ok(Value::Bool(a.compare(&b) == Ordering::Less))
}

fn lte(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let (a, b) = compare_pair(doc, args, ctx, "$lte")?;
    Ok(Value::Bool(a.compare(&b) != Ordering::Greater))
}

// ---- boolean ----

fn and(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_array(doc, args, ctx, "$and")?;
    Ok(Value::Bool(items.iter().all(Value::is_truthy)))
}

fn or(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_array(doc, args, ctx, "$or")?;
    Ok(Value::Bool(items.iter().any(Value::is_truthy)))
}

fn not(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let v = match eval(doc, args, ctx)? {
        Value::Array(items) if items.len() == 1 => items[0].clone(),
        v => v,
    };
    Ok(Value::Bool(!v.is_truthy()))
}

// ---- conditional ----

fn cond(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let (condition, then_expr, else_expr) = match args {
        Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
        Value::Object(obj) => {
            let get = |k: &str| {
                obj.get(k)
                    .ok_or_else(|| Error::Type(format!("$cond: missing '{}' branch", k)))
            };
            (get("if")?, get("then")?, get("else")?)
        }
        _ => {
            return Err(Error::Type(
                "$cond: expected [if, then, else] or {if, then, else}".to_string(),
            ));
        }
    };
    if eval(doc, condition, ctx)?.is_truthy() {
        eval(doc, then_expr, ctx)
    } else {
        eval(doc, else_expr, ctx)
    }
}

fn if_null(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let Value::Array(exprs) = args else {
        return Err(Error::Type("$ifNull: expected an array of expressions".to_string()));
    };
    if exprs.len() < 2 {
        return Err(Error::Type("$ifNull: expected at least 2 arguments".to_string()));
    }
    for expr in &exprs[..exprs.len() - 1] {
        let v = eval(doc, expr, ctx)?;
        if !v.is_nil() {
            return Ok(v);
        }
    }
    eval(doc, &exprs[exprs.len() - 1], ctx)
}

fn switch(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let obj = args
        .as_object()
        .ok_or_else(|| Error::Type("$switch: expected an object argument".to_string()))?;
    let branches = obj
        .get("branches")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Type("$switch: 'branches' must be an array".to_string()))?;
    for branch in branches {
        let branch = branch
            .as_object()
            .ok_or_else(|| Error::Type("$switch: branch must be an object".to_string()))?;
        let case = branch
            .get("case")
            .ok_or_else(|| Error::Type("$switch: branch missing 'case'".to_string()))?;
        if eval(doc, case, ctx)?.is_truthy() {
            let then = branch
                .get("then")
                .ok_or_else(|| Error::Type("$switch: branch missing 'then'".to_string()))?;
            return eval(doc, then, ctx);
        }
    }
    match obj.get("default") {
        Some(default) => eval(doc, default, ctx),
        None => Err(Error::Type("$switch: no branch matched and no default given".to_string())),
    }
}

// ---- arrays ----

fn array_elem_at(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_args(doc, args, ctx, "$arrayElemAt", 2)?;
    if items[0].is_nil() {
        return Ok(Value::Null);
    }
    let arr = items[0]
        .as_array()
        .ok_or_else(|| Error::Type("$arrayElemAt: first argument must be an array".to_string()))?;
    let idx = items[1]
        .as_i64()
        .ok_or_else(|| Error::Type("$arrayElemAt: index must be an integer".to_string()))?;
    let resolved = if idx < 0 {
        arr.len().checked_sub(idx.unsigned_abs() as usize)
    } else {
        Some(idx as usize)
    };
    Ok(resolved
        .and_then(|i| arr.get(i))
        .cloned()
        .unwrap_or(Value::Missing))
}

fn concat_arrays(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_array(doc, args, ctx, "$concatArrays")?;
    let mut out = Vec::new();
    for item in items {
        match item {
            Value::Null | Value::Missing => return Ok(Value::Null),
            Value::Array(arr) => out.extend(arr),
            other => {
                return Err(Error::Type(format!(
                    "$concatArrays: expected arrays, got {}",
                    other.type_name()
                )));
            }
        }
    }
    Ok(Value::Array(out))
}

/// Shared plumbing for `$map` and `$filter`: pull `input` (must be an
/// array or nil), the element variable name, and the body expression.
fn input_as_and_body<'a>(
    doc: &Value,
    args: &'a Value,
    ctx: &EvalContext,
    op: &str,
    body_key: &str,
) -> Result<(Option<Vec<Value>>, String, &'a Value)> {
    let obj = args
        .as_object()
        .ok_or_else(|| Error::Type(format!("{}: expected an object argument", op)))?;
    let input = obj
        .get("input")
        .ok_or_else(|| Error::Type(format!("{}: missing 'input'", op)))?;
    let name = match obj.get("as") {
        Some(Value::String(s)) => s.clone(),
        None => "this".to_string(),
        Some(_) => return Err(Error::Type(format!("{}: 'as' must be a string", op))),
    };
    let body = obj
        .get(body_key)
        .ok_or_else(|| Error::Type(format!("{}: missing '{}'", op, body_key)))?;
    let input = match eval(doc, input, ctx)? {
        Value::Null | Value::Missing => None,
        Value::Array(items) => Some(items),
        other => {
            return Err(Error::Type(format!(
                "{}: input must be an array, got {}",
                op,
                other.type_name()
            )));
        }
    };
    Ok((input, name, body))
}

fn map(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let (input, name, body) = input_as_and_body(doc, args, ctx, "$map", "in")?;
    let Some(items) = input else {
        return Ok(Value::Null);
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let scoped = ctx.with_var(&name, item);
        out.push(eval(doc, body, &scoped)?);
    }
    Ok(Value::Array(out))
}

fn filter(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let (input, name, cond) = input_as_and_body(doc, args, ctx, "$filter", "cond")?;
    let Some(items) = input else {
        return Ok(Value::Null);
    };
    let mut out = Vec::new();
    for item in items {
        let scoped = ctx.with_var(&name, item.clone());
        if eval(doc, cond, &scoped)?.is_truthy() {
            out.push(item);
        }
    }
    Ok(Value::Array(out))
}

fn reduce(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let obj = args
        .as_object()
        .ok_or_else(|| Error::Type("$reduce: expected an object argument".to_string()))?;
    let input = obj
        .get("input")
        .ok_or_else(|| Error::Type("$reduce: missing 'input'".to_string()))?;
    let init = obj
        .get("initialValue")
        .ok_or_else(|| Error::Type("$reduce: missing 'initialValue'".to_string()))?;
    let body = obj
        .get("in")
        .ok_or_else(|| Error::Type("$reduce: missing 'in'".to_string()))?;
    let items = match eval(doc, input, ctx)? {
        Value::Null | Value::Missing => return Ok(Value::Null),
        Value::Array(items) => items,
        other => {
            return Err(Error::Type(format!(
                "$reduce: input must be an array, got {}",
                other.type_name()
            )));
        }
    };
    let mut acc = eval(doc, init, ctx)?;
    for item in items {
        let scoped = ctx.with_var("value", acc).with_var("this", item);
        acc = eval(doc, body, &scoped)?;
    }
    Ok(acc)
}

fn in_array(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_args(doc, args, ctx, "$in", 2)?;
    let arr = items[1]
        .as_array()
        .ok_or_else(|| Error::Type("$in: second argument must be an array".to_string()))?;
    Ok(Value::Bool(arr.contains(&items[0])))
}

fn index_of_array(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_array(doc, args, ctx, "$indexOfArray")?;
    if items.len() < 2 || items.len() > 4 {
        return Err(Error::Type("$indexOfArray: expected 2 to 4 arguments".to_string()));
    }
    if items[0].is_nil() {
        return Ok(Value::Null);
    }
    let arr = items[0]
        .as_array()
        .ok_or_else(|| Error::Type("$indexOfArray: first argument must be an array".to_string()))?;
    let start = items.get(2).and_then(Value::as_i64).unwrap_or(0).max(0) as usize;
    let end = items
        .get(3)
        .and_then(Value::as_i64)
        .map(|n| n.max(0) as usize)
        .unwrap_or(arr.len())
        .min(arr.len());
    for (i, v) in arr.iter().enumerate().take(end).skip(start) {
        if *v == items[1] {
            return Ok(Value::Int(i as i64));
        }
    }
    Ok(Value::Int(-1))
}

fn is_array(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let v = match eval(doc, args, ctx)? {
        Value::Array(items) if items.len() == 1 => items[0].clone(),
        v => v,
    };
    Ok(Value::Bool(matches!(v, Value::Array(_))))
}

fn range(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_array(doc, args, ctx, "$range")?;
    if items.len() < 2 || items.len() > 3 {
        return Err(Error::Type("$range: expected 2 or 3 arguments".to_string()));
    }
    let start = items[0]
        .as_i64()
        .ok_or_else(|| Error::Type("$range: start must be an integer".to_string()))?;
    let end = items[1]
        .as_i64()
        .ok_or_else(|| Error::Type("$range: end must be an integer".to_string()))?;
    let step = match items.get(2) {
        Some(v) => v
            .as_i64()
            .ok_or_else(|| Error::Type("$range: step must be an integer".to_string()))?,
        None => 1,
    };
    if step == 0 {
        return Err(Error::Type("$range: step must be non-zero".to_string()));
    }
    let mut out = Vec::new();
    let mut n = start;
    while (step > 0 && n < end) || (step < 0 && n > end) {
        out.push(Value::Int(n));
        n += step;
    }
    Ok(Value::Array(out))
}

fn reverse_array(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    match eval(doc, args, ctx)? {
        Value::Null | Value::Missing => Ok(Value::Null),
        Value::Array(mut items) => {
            items.reverse();
            Ok(Value::Array(items))
        }
        other => Err(Error::Type(format!(
            "$reverseArray: expected an array, got {}",
            other.type_name()
        ))),
    }
}

fn size(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    match eval(doc, args, ctx)? {
        Value::Array(items) => Ok(Value::Int(items.len() as i64)),
        other => Err(Error::Type(format!(
            "$size: expected an array, got {}",
            other.type_name()
        ))),
    }
}

fn slice(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_array(doc, args, ctx, "$slice")?;
    if items.len() < 2 || items.len() > 3 {
        return Err(Error::Type("$slice: expected 2 or 3 arguments".to_string()));
    }
    if items[0].is_nil() {
        return Ok(Value::Null);
    }
    let arr = items[0]
        .as_array()
        .ok_or_else(|| Error::Type("$slice: first argument must be an array".to_string()))?;
    Ok(Value::Array(slice_array(arr, &items[1..])?))
}

/// Slice semantics shared with the projection operator: `[n]` takes the
/// first n (or last n when negative); `[skip, n]` requires a positive
/// limit, with a negative skip counting from the end.
pub(crate) fn slice_array(arr: &[Value], spec: &[Value]) -> Result<Vec<Value>> {
    let first = spec[0]
        .as_i64()
        .ok_or_else(|| Error::Type("$slice: arguments must be integers".to_string()))?;
    if spec.len() == 1 {
        if first < 0 {
            let n = first.unsigned_abs() as usize;
            let start = arr.len().saturating_sub(n);
            return Ok(arr[start..].to_vec());
        }
        return Ok(arr.iter().take(first as usize).cloned().collect());
    }
    let limit = spec[1]
        .as_i64()
        .ok_or_else(|| Error::Type("$slice: arguments must be integers".to_string()))?;
    if limit <= 0 {
        return Err(Error::Type("$slice: limit must be positive".to_string()));
    }
    let start = if first < 0 {
        arr.len().saturating_sub(first.unsigned_abs() as usize)
    } else {
        (first as usize).min(arr.len())
    };
    Ok(arr[start..].iter().take(limit as usize).cloned().collect())
}

fn zip(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let obj = args
        .as_object()
        .ok_or_else(|| Error::Type("$zip: expected an object argument".to_string()))?;
    let inputs_expr = obj
        .get("inputs")
        .ok_or_else(|| Error::Type("$zip: missing 'inputs'".to_string()))?;
    let inputs = eval_array(doc, inputs_expr, ctx, "$zip")?;
    let use_longest = obj
        .get("useLongestLength")
        .map(Value::is_truthy)
        .unwrap_or(false);
    let defaults = match obj.get("defaults") {
        Some(d) => eval(doc, d, ctx)?.as_array().cloned(),
        None => None,
    };
    let mut arrays = Vec::with_capacity(inputs.len());
    for input in &inputs {
        match input {
            Value::Null | Value::Missing => return Ok(Value::Null),
            Value::Array(arr) => arrays.push(arr.clone()),
            other => {
                return Err(Error::Type(format!(
                    "$zip: inputs must be arrays, got {}",
                    other.type_name()
                )));
            }
        }
    }
    let len = if use_longest {
        arrays.iter().map(Vec::len).max().unwrap_or(0)
    } else {
        arrays.iter().map(Vec::len).min().unwrap_or(0)
    };
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let mut row = Vec::with_capacity(arrays.len());
        for (j, arr) in arrays.iter().enumerate() {
            let v = arr.get(i).cloned().unwrap_or_else(|| {
                defaults
                    .as_ref()
                    .and_then(|d| d.get(j))
                    .cloned()
                    .unwrap_or(Value::Null)
            });
            row.push(v);
        }
        out.push(Value::Array(row));
    }
    Ok(Value::Array(out))
}

// ---- objects ----

fn merge_objects(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = match eval(doc, args, ctx)? {
        Value::Array(items) => items,
        v @ Value::Object(_) => vec![v],
        Value::Null | Value::Missing => vec![],
        other => {
            return Err(Error::Type(format!(
                "$mergeObjects: expected objects, got {}",
                other.type_name()
            )));
        }
    };
    let mut out = Map::new();
    for item in items {
        match item {
            Value::Null | Value::Missing => {}
            Value::Object(obj) => out.extend(obj),
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

fn object_to_array(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    match eval(doc, args, ctx)? {
        Value::Null | Value::Missing => Ok(Value::Null),
        Value::Object(obj) => Ok(Value::Array(
            obj.iter()
                .map(|(k, v)| {
                    Value::object([("k", Value::String(k.clone())), ("v", v.clone())])
                })
                .collect(),
        )),
        other => Err(Error::Type(format!(
            "$objectToArray: expected an object, got {}",
            other.type_name()
        ))),
    }
}

fn array_to_object(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let v = match eval(doc, args, ctx)? {
        Value::Null | Value::Missing => return Ok(Value::Null),
        v => v,
    };
    let items = v
        .as_array()
        .ok_or_else(|| Error::Type("$arrayToObject: expected an array".to_string()))?;
    let mut out = Map::new();
    for item in items {
        match item {
            Value::Array(pair) if pair.len() == 2 => {
                let key = pair[0]
                    .as_str()
                    .ok_or_else(|| Error::Type("$arrayToObject: key must be a string".to_string()))?;
                out.insert(key.to_string(), pair[1].clone());
            }
            Value::Object(obj) => {
                let key = obj
                    .get("k")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Type("$arrayToObject: missing string 'k'".to_string()))?;
                let value = obj
                    .get("v")
                    .ok_or_else(|| Error::Type("$arrayToObject: missing 'v'".to_string()))?;
                out.insert(key.to_string(), value.clone());
            }
            other => {
                return Err(Error::Type(format!(
                    "$arrayToObject: expected [k, v] pairs or {{k, v}} objects, got {}",
                    other.type_name()
                )));
            }
        }
    }
    Ok(Value::Object(out))
}

// ---- sets ----

fn to_set(items: &[Value]) -> (Vec<Value>, HashSet<String>) {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(codec::encode(item)) {
            out.push(item.clone());
        }
    }
    (out, seen)
}

fn eval_set_args(doc: &Value, args: &Value, ctx: &EvalContext, op: &str) -> Result<Vec<Vec<Value>>> {
    let items = eval_array(doc, args, ctx, op)?;
    items
        .into_iter()
        .map(|v| match v {
            Value::Array(arr) => Ok(arr),
            other => Err(Error::Type(format!(
                "{}: expected arrays, got {}",
                op,
                other.type_name()
            ))),
        })
        .collect()
}

fn set_union(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let sets = eval_set_args(doc, args, ctx, "$setUnion")?;
    let all: Vec<Value> = sets.into_iter().flatten().collect();
    Ok(Value::Array(to_set(&all).0))
}

fn set_intersection(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let sets = eval_set_args(doc, args, ctx, "$setIntersection")?;
    let Some((first, rest)) = sets.split_first() else {
        return Ok(Value::Array(vec![]));
    };
    let (mut out, _) = to_set(first);
    for set in rest {
        let keys: HashSet<String> = set.iter().map(codec::encode).collect();
        out.retain(|v| keys.contains(&codec::encode(v)));
    }
    Ok(Value::Array(out))
}

fn set_difference(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let sets = eval_set_args(doc, args, ctx, "$setDifference")?;
    if sets.len() != 2 {
        return Err(Error::Type("$setDifference: expected exactly 2 arrays".to_string()));
    }
    let exclude: HashSet<String> = sets[1].iter().map(codec::encode).collect();
    let (mut out, _) = to_set(&sets[0]);
    out.retain(|v| !exclude.contains(&codec::encode(v)));
    Ok(Value::Array(out))
}

fn set_equals(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let sets = eval_set_args(doc, args, ctx, "$setEquals")?;
    if sets.len() < 2 {
        return Err(Error::Type("$setEquals: expected at least 2 arrays".to_string()));
    }
    let first: HashSet<String> = sets[0].iter().map(codec::encode).collect();
    Ok(Value::Bool(sets[1..].iter().all(|set| {
        let keys: HashSet<String> = set.iter().map(codec::encode).collect();
        keys == first
    })))
}

fn set_is_subset(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let sets = eval_set_args(doc, args, ctx, "$setIsSubset")?;
    if sets.len() != 2 {
        return Err(Error::Type("$setIsSubset: expected exactly 2 arrays".to_string()));
    }
    let superset: HashSet<String> = sets[1].iter().map(codec::encode).collect();
    Ok(Value::Bool(
        sets[0].iter().all(|v| superset.contains(&codec::encode(v))),
    ))
}

fn all_elements_true(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let sets = eval_set_args(doc, args, ctx, "$allElementsTrue")?;
    if sets.len() != 1 {
        return Err(Error::Type("$allElementsTrue: expected a single array".to_string()));
    }
    Ok(Value::Bool(sets[0].iter().all(Value::is_truthy)))
}

fn any_element_true(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let sets = eval_set_args(doc, args, ctx, "$anyElementTrue")?;
    if sets.len() != 1 {
        return Err(Error::Type("$anyElementTrue: expected a single array".to_string()));
    }
    Ok(Value::Bool(sets[0].iter().any(Value::is_truthy)))
}

// ---- strings ----

fn concat(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_array(doc, args, ctx, "$concat")?;
    let mut out = String::new();
    for item in &items {
        match item {
            Value::Null | Value::Missing => return Ok(Value::Null),
            Value::String(s) => out.push_str(s),
            other => {
                return Err(Error::Type(format!(
                    "$concat: expected strings, got {}",
                    other.type_name()
                )));
            }
        }
    }
    Ok(Value::String(out))
}

fn index_of_cp(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_array(doc, args, ctx, "$indexOfCP")?;
    if items.len() < 2 || items.len() > 4 {
        return Err(Error::Type("$indexOfCP: expected 2 to 4 arguments".to_string()));
    }
    if items[0].is_nil() {
        return Ok(Value::Null);
    }
    let s = items[0]
        .as_str()
        .ok_or_else(|| Error::Type("$indexOfCP: first argument must be a string".to_string()))?;
    let search = items[1]
        .as_str()
        .ok_or_else(|| Error::Type("$indexOfCP: second argument must be a string".to_string()))?;
    let chars: Vec<char> = s.chars().collect();
    let needle: Vec<char> = search.chars().collect();
    let start = items.get(2).and_then(Value::as_i64).unwrap_or(0).max(0) as usize;
    let end = items
        .get(3)
        .and_then(Value::as_i64)
        .map(|n| n.max(0) as usize)
        .unwrap_or(chars.len())
        .min(chars.len());
    if needle.is_empty() {
        return Ok(Value::Int(start.min(end) as i64));
    }
    if start + needle.len() > end {
        return Ok(Value::Int(-1));
    }
    for i in start..=(end - needle.len()) {
        if chars[i..i + needle.len()] == needle[..] {
            return Ok(Value::Int(i as i64));
        }
    }
    Ok(Value::Int(-1))
}

fn split(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_args(doc, args, ctx, "$split", 2)?;
    if items[0].is_nil() {
        return Ok(Value::Null);
    }
    let s = items[0]
        .as_str()
        .ok_or_else(|| Error::Type("$split: first argument must be a string".to_string()))?;
    let sep = items[1]
        .as_str()
        .ok_or_else(|| Error::Type("$split: delimiter must be a string".to_string()))?;
    if sep.is_empty() {
        return Err(Error::Type("$split: delimiter must not be empty".to_string()));
    }
    Ok(Value::Array(
        s.split(sep).map(|part| Value::String(part.to_string())).collect(),
    ))
}

fn strcasecmp(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_args(doc, args, ctx, "$strcasecmp", 2)?;
    let a = items[0].as_str().unwrap_or("").to_lowercase();
    let b = items[1].as_str().unwrap_or("").to_lowercase();
    Ok(Value::Int(match a.cmp(&b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

fn str_len_cp(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    match eval(doc, args, ctx)? {
        Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
        other => Err(Error::Type(format!(
            "$strLenCP: expected a string, got {}",
            other.type_name()
        ))),
    }
}

fn substr_cp(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let items = eval_args(doc, args, ctx, "$substrCP", 3)?;
    if items[0].is_nil() {
        return Ok(Value::String(String::new()));
    }
    let s = items[0]
        .as_str()
        .ok_or_else(|| Error::Type("$substrCP: first argument must be a string".to_string()))?;
    let start = items[1]
        .as_i64()
        .ok_or_else(|| Error::Type("$substrCP: start must be an integer".to_string()))?;
    let len = items[2]
        .as_i64()
        .ok_or_else(|| Error::Type("$substrCP: length must be an integer".to_string()))?;
    if start < 0 || len < 0 {
        return Err(Error::Type("$substrCP: start and length must be non-negative".to_string()));
    }
    Ok(Value::String(
        s.chars().skip(start as usize).take(len as usize).collect(),
    ))
}

fn to_lower(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    match eval(doc, args, ctx)? {
        Value::Null | Value::Missing => Ok(Value::String(String::new())),
        Value::String(s) => Ok(Value::String(s.to_lowercase())),
        other => Err(Error::Type(format!(
            "$toLower: expected a string, got {}",
            other.type_name()
        ))),
    }
}

fn to_upper(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    match eval(doc, args, ctx)? {
        Value::Null | Value::Missing => Ok(Value::String(String::new())),
        Value::String(s) => Ok(Value::String(s.to_uppercase())),
        other => Err(Error::Type(format!(
            "$toUpper: expected a string, got {}",
            other.type_name()
        ))),
    }
}

fn trim_impl(
    doc: &Value,
    args: &Value,
    ctx: &EvalContext,
    op: &str,
    left: bool,
    right: bool,
) -> Result<Value> {
    let obj = args
        .as_object()
        .ok_or_else(|| Error::Type(format!("{}: expected an object argument", op)))?;
    let input = obj
        .get("input")
        .ok_or_else(|| Error::Type(format!("{}: missing 'input'", op)))?;
    let input = match eval(doc, input, ctx)? {
        Value::Null | Value::Missing => return Ok(Value::Null),
        Value::String(s) => s,
        other => {
            return Err(Error::Type(format!(
                "{}: input must be a string, got {}",
                op,
                other.type_name()
            )));
        }
    };
    let chars: Option<Vec<char>> = match obj.get("chars") {
        Some(c) => match eval(doc, c, ctx)? {
            Value::String(s) => Some(s.chars().collect()),
            Value::Null | Value::Missing => None,
            other => {
                return Err(Error::Type(format!(
                    "{}: chars must be a string, got {}",
                    op,
                    other.type_name()
                )));
            }
        },
        None => None,
    };
    let pred = |c: char| match &chars {
        Some(set) => set.contains(&c),
        None => c.is_whitespace(),
    };
    let out = match (left, right) {
        (true, true) => input.trim_matches(pred),
        (true, false) => input.trim_start_matches(pred),
        (false, true) => input.trim_end_matches(pred),
        (false, false) => input.as_str(),
    };
    Ok(Value::String(out.to_string()))
}

fn trim(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    trim_impl(doc, args, ctx, "$trim", true, true)
}

fn ltrim(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    trim_impl(doc, args, ctx, "$ltrim", true, false)
}

fn rtrim(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    trim_impl(doc, args, ctx, "$rtrim", false, true)
}

// ---- dates ----

fn eval_date(doc: &Value, args: &Value, ctx: &EvalContext, op: &str) -> Result<Option<DateTime<Utc>>> {
    let v = match eval(doc, args, ctx)? {
        Value::Array(items) if items.len() == 1 => items[0].clone(),
        v => v,
    };
    match v {
        Value::Null | Value::Missing => Ok(None),
        Value::Date(dt) => Ok(Some(dt)),
        other => Err(Error::Type(format!(
            "{}: expected a date, got {}",
            op,
            other.type_name()
        ))),
    }
}

macro_rules! date_part {
    ($name:ident, $op:literal, |$dt:ident| $body:expr) => {
        fn $name(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
            Ok(match eval_date(doc, args, ctx, $op)? {
                None => Value::Null,
                Some($dt) => Value::Int($body),
            })
        }
    };
}

date_part!(year, "$year", |dt| dt.year() as i64);
date_part!(month, "$month", |dt| dt.month() as i64);
date_part!(day_of_month, "$dayOfMonth", |dt| dt.day() as i64);
date_part!(hour, "$hour", |dt| dt.hour() as i64);
date_part!(minute, "$minute", |dt| dt.minute() as i64);
date_part!(second, "$second", |dt| dt.second() as i64);
date_part!(millisecond, "$millisecond", |dt| dt.timestamp_subsec_millis() as i64);
date_part!(day_of_week, "$dayOfWeek", |dt| dt.weekday().num_days_from_sunday() as i64 + 1);
date_part!(day_of_year, "$dayOfYear", |dt| dt.ordinal() as i64);

fn date_to_string(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let obj = args
        .as_object()
        .ok_or_else(|| Error::Type("$dateToString: expected an object argument".to_string()))?;
    let format = obj
        .get("format")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Type("$dateToString: missing string 'format'".to_string()))?;
    let date_expr = obj
        .get("date")
        .ok_or_else(|| Error::Type("$dateToString: missing 'date'".to_string()))?;
    let Some(dt) = eval_date(doc, date_expr, ctx, "$dateToString")? else {
        return Ok(Value::Null);
    };
    Ok(Value::String(format_date(&dt, format)?))
}

/// Render the date format mini-language: `%Y %m %d %H %M %S %L %j %w %U`
/// plus `%%`.
fn format_date(dt: &DateTime<Utc>, fmt: &str) -> Result<String> {
    let mut out = String::new();
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('Y') => out.push_str(&format!("{:04}", dt.year())),
            Some('m') => out.push_str(&format!("{:02}", dt.month())),
            Some('d') => out.push_str(&format!("{:02}", dt.day())),
            Some('H') => out.push_str(&format!("{:02}", dt.hour())),
            Some('M') => out.push_str(&format!("{:02}", dt.minute())),
            Some('S') => out.push_str(&format!("{:02}", dt.second())),
            Some('L') => out.push_str(&format!("{:03}", dt.timestamp_subsec_millis())),
            Some('j') => out.push_str(&format!("{:03}", dt.ordinal())),
            Some('w') => out.push_str(&(dt.weekday().num_days_from_sunday() + 1).to_string()),
            Some('U') => {
                let week = (dt.ordinal() + 6 - dt.weekday().num_days_from_sunday()) / 7;
                out.push_str(&format!("{:02}", week));
            }
            Some('%') => out.push('%'),
            Some(other) => {
                return Err(Error::Type(format!(
                    "$dateToString: unknown format specifier %{}",
                    other
                )));
            }
            None => {
                return Err(Error::Type("$dateToString: trailing % in format".to_string()));
            }
        }
    }
    Ok(out)
}

// ---- types & conversion ----

/// Type name as reported by `$type` and accepted by `$convert`.
/// Integers fitting 32 bits report `"int"`, wider ones `"long"`.
pub(crate) fn bson_type_name(v: &Value) -> &'static str {
    match v {
        Value::Int(n) if *n >= i32::MIN as i64 && *n <= i32::MAX as i64 => "int",
        Value::Int(_) => "long",
        Value::Float(_) => "double",
        Value::Bool(_) => "bool",
        Value::String(_) => "string",
        Value::Null => "null",
        Value::Missing => "missing",
        Value::Date(_) => "date",
        Value::Regex(_) => "regex",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_of(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let v = eval(doc, args, ctx)?;
    Ok(Value::String(bson_type_name(&v).to_string()))
}

fn convert_to(v: &Value, target: &str) -> Result<Value> {
    if v.is_nil() && target != "string" {
        return Ok(Value::Null);
    }
    match target {
        "bool" => Ok(Value::Bool(match v {
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            // Any string converts to true, even ""
            Value::String(_) => true,
            Value::Date(_) => true,
            other => {
                return Err(Error::Type(format!(
                    "cannot convert {} to bool",
                    other.type_name()
                )));
            }
        })),
        "double" => match v {
            Value::Int(n) => Ok(Value::Float(*n as f64)),
            Value::Float(n) => Ok(Value::Float(*n)),
            Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| Error::Type(format!("cannot convert '{}' to double", s))),
            Value::Date(dt) => Ok(Value::Float(dt.timestamp_millis() as f64)),
            other => Err(Error::Type(format!(
                "cannot convert {} to double",
                other.type_name()
            ))),
        },
        "int" | "long" => match v {
            Value::Int(n) => Ok(Value::Int(*n)),
            Value::Float(n) => Ok(Value::Int(n.trunc() as i64)),
            Value::Bool(b) => Ok(Value::Int(if *b { 1 } else { 0 })),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| Error::Type(format!("cannot convert '{}' to {}", s, target))),
            Value::Date(dt) => Ok(Value::Int(dt.timestamp_millis())),
            other => Err(Error::Type(format!(
                "cannot convert {} to {}",
                other.type_name(),
                target
            ))),
        },
        "string" => Ok(Value::String(match v {
            Value::Null | Value::Missing => return Ok(Value::Null),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Date(dt) => dt.to_rfc3339(),
            other => {
                return Err(Error::Type(format!(
                    "cannot convert {} to string",
                    other.type_name()
                )));
            }
        })),
        "date" => match v {
            Value::Date(dt) => Ok(Value::Date(*dt)),
            Value::Int(n) => DateTime::<Utc>::from_timestamp_millis(*n)
                .map(Value::Date)
                .ok_or_else(|| Error::Type("timestamp out of range for date".to_string())),
            Value::Float(n) => DateTime::<Utc>::from_timestamp_millis(*n as i64)
                .map(Value::Date)
                .ok_or_else(|| Error::Type("timestamp out of range for date".to_string())),
            Value::String(s) => s
                .parse::<DateTime<Utc>>()
                .map(Value::Date)
                .map_err(|_| Error::Type(format!("cannot convert '{}' to date", s))),
            other => Err(Error::Type(format!(
                "cannot convert {} to date",
                other.type_name()
            ))),
        },
        other => Err(Error::Type(format!("$convert: unknown target type '{}'", other))),
    }
}

fn convert(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let obj = args
        .as_object()
        .ok_or_else(|| Error::Type("$convert: expected an object argument".to_string()))?;
    let input = obj
        .get("input")
        .ok_or_else(|| Error::Type("$convert: missing 'input'".to_string()))?;
    let target = obj
        .get("to")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Type("$convert: missing string 'to'".to_string()))?;
    let v = eval(doc, input, ctx)?;
    if v.is_nil()
        && let Some(on_null) = obj.get("onNull")
    {
        return eval(doc, on_null, ctx);
    }
    match convert_to(&v, target) {
        Ok(out) => Ok(out),
        Err(e) => match obj.get("onError") {
            Some(on_error) => eval(doc, on_error, ctx),
            None => Err(e),
        },
    }
}

macro_rules! shorthand_convert {
    ($name:ident, $op:literal, $target:literal) => {
        fn $name(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
            let v = eval(doc, args, ctx)?;
            convert_to(&v, $target).map_err(|e| match e {
                Error::Type(msg) => Error::Type(format!("{}: {}", $op, msg)),
                other => other,
            })
        }
    };
}

shorthand_convert!(to_bool, "$toBool", "bool");
shorthand_convert!(to_double, "$toDouble", "double");
shorthand_convert!(to_int, "$toInt", "int");
shorthand_convert!(to_long, "$toLong", "long");
shorthand_convert!(to_string, "$toString", "string");
shorthand_convert!(to_date, "$toDate", "date");

// ---- literals & variables ----

fn literal(_doc: &Value, args: &Value, _ctx: &EvalContext) -> Result<Value> {
    Ok(args.clone())
}

fn let_bind(doc: &Value, args: &Value, ctx: &EvalContext) -> Result<Value> {
    let obj = args
        .as_object()
        .ok_or_else(|| Error::Type("$let: expected an object argument".to_string()))?;
    let vars = obj
        .get("vars")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::Type("$let: 'vars' must be an object".to_string()))?;
    let body = obj
        .get("in")
        .ok_or_else(|| Error::Type("$let: missing 'in'".to_string()))?;
    let mut scoped = ctx.clone();
    for (name, expr) in vars {
        let value = compute_value(doc, expr, None, &scoped)?;
        scoped = scoped.with_var(name, value);
    }
    eval(doc, body, &scoped)
}
