//! Projection-class operators (`$slice`, `$elemMatch`).
//!
//! Each operator receives the document, its argument expression and the
//! selector it was attached to, and returns the value to place at that
//! selector in the projected document (`Missing` to omit it).

use std::sync::Arc;

use super::expression::slice_array;
use crate::error::{Error, Result};
use crate::eval::EvalContext;
use crate::path;
use crate::query::Query;
use crate::registry::{OperatorImpl, Registry};
use crate::value::Value;

pub(crate) fn install(reg: &mut Registry) {
    let ops: &[(&str, fn(&Value, &Value, &str, &EvalContext) -> Result<Value>)] =
        &[("$slice", slice), ("$elemMatch", elem_match)];
    for (name, f) in ops {
        reg.builtin(name, OperatorImpl::Projection(Arc::new(*f)));
    }
}

fn slice(doc: &Value, expr: &Value, selector: &str, _ctx: &EvalContext) -> Result<Value> {
    let resolved = path::resolve(doc, selector);
    let Some(arr) = resolved.as_array() else {
        return Ok(Value::Missing);
    };
    let spec = match expr {
        Value::Array(spec) if spec.len() == 2 => spec.clone(),
        Value::Int(_) | Value::Float(_) => vec![expr.clone()],
        _ => {
            return Err(Error::Projection(
                "$slice: expected a count or [skip, limit] pair".to_string(),
            ));
        }
    };
    Ok(Value::Array(slice_array(arr, &spec)?))
}

/// Projects the first array element matching the given criteria.
fn elem_match(doc: &Value, expr: &Value, selector: &str, _ctx: &EvalContext) -> Result<Value> {
    let resolved = path::resolve(doc, selector);
    let Some(items) = resolved.as_array() else {
        return Ok(Value::Missing);
    };
    let query = Query::new(expr.clone())?;
    for item in items {
        if query.test(item)? {
            return Ok(Value::Array(vec![item.clone()]));
        }
    }
    Ok(Value::Missing)
}
