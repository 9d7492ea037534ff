//! Built-in operator implementations, one module per operator class.

pub(crate) mod expression;
pub(crate) mod group;
pub(crate) mod pipeline;
pub(crate) mod projection;
pub(crate) mod query;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::error::{Error, Result};
use crate::eval::{EvalContext, compute_value};
use crate::value::Value;

/// Evaluate an operator argument expression.
pub(crate) fn eval(doc: &Value, expr: &Value, ctx: &EvalContext) -> Result<Value> {
    compute_value(doc, expr, None, ctx)
}

/// Evaluate an argument expression that must yield an array.
pub(crate) fn eval_array(doc: &Value, expr: &Value, ctx: &EvalContext, op: &str) -> Result<Vec<Value>> {
    match eval(doc, expr, ctx)? {
        Value::Array(items) => Ok(items),
        other => Err(Error::Type(format!(
            "{}: expected an array argument, got {}",
            op,
            other.type_name()
        ))),
    }
}

/// Evaluate an argument expression that must yield an array of exactly
/// `n` elements.
pub(crate) fn eval_args(
    doc: &Value,
    expr: &Value,
    ctx: &EvalContext,
    op: &str,
    n: usize,
) -> Result<Vec<Value>> {
    let items = eval_array(doc, expr, ctx, op)?;
    if items.len() != n {
        return Err(Error::Type(format!(
            "{}: expected {} argument(s), got {}",
            op,
            n,
            items.len()
        )));
    }
    Ok(items)
}

/// Do two values belong to the same comparison type class? Numbers
/// compare across the int/float split; everything else must match kind.
pub(crate) fn types_match(a: &Value, b: &Value) -> bool {
    if a.is_number() && b.is_number() {
        return true;
    }
    matches!(
        (a, b),
        (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Date(_), Value::Date(_))
            | (Value::Regex(_), Value::Regex(_))
            | (Value::Array(_), Value::Array(_))
            | (Value::Object(_), Value::Object(_))
            | (Value::Null, Value::Null)
    )
}

fn to_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Int(n) => Decimal::from_i64(*n),
        Value::Float(n) => Decimal::from_f64(*n),
        _ => None,
    }
}

/// Numeric binary operation preserving integer results.
///
/// Integer pairs stay integers while the checked operation fits; mixed
/// int/float pairs go through decimal arithmetic so mathematically whole
/// results come back as integers rather than floats.
pub(crate) fn arith(
    op: &str,
    a: &Value,
    b: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    dec_op: fn(Decimal, Decimal) -> Decimal,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    if a.is_nil() || b.is_nil() {
        return Ok(Value::Null);
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(match int_op(*x, *y) {
            Some(n) => Value::Int(n),
            None => Value::Float(float_op(*x as f64, *y as f64)),
        }),
        (x, y) if x.is_number() && y.is_number() => {
            if let (Some(xd), Some(yd)) = (to_decimal(x), to_decimal(y)) {
                let rd = dec_op(xd, yd);
                if rd.is_integer()
                    && let Some(n) = rd.to_i64()
                {
                    return Ok(Value::Int(n));
                } else if let Some(n) = rd.to_f64() {
                    return Ok(Value::Float(n));
                }
            }
            Ok(Value::Float(float_op(
                x.as_f64().unwrap_or(f64::NAN),
                y.as_f64().unwrap_or(f64::NAN),
            )))
        }
        (x, y) => Err(Error::Type(format!(
            "{}: cannot operate on {} and {}",
            op,
            x.type_name(),
            y.type_name()
        ))),
    }
}
