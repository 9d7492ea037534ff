//! Expression-tree evaluation.
//!
//! [`compute_value`] interprets the declarative expression DSL: operator
//! invocations, `$field` references, `$$`-prefixed system variables, and
//! literal object/array templates, all resolved against a current
//! document plus a shared root context.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::path;
use crate::registry;
use crate::registry::OperatorClass;
use crate::value::{Map, Value};

/// Engine configuration threaded through query, aggregation and cursor
/// construction.
///
/// There is deliberately no process-global settings object; two callers
/// with different identity keys can run side by side.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the identity field (`$group`'s implicit key, `$project`'s
    /// default-included field).
    pub id_key: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            id_key: "_id".to_string(),
        }
    }
}

/// String collation for `$sort`.
///
/// Strengths 1 and 2 compare strings case-insensitively; other strengths
/// fall back to default ordering.
#[derive(Debug, Clone)]
pub struct Collation {
    pub locale: String,
    pub strength: u8,
}

/// Shared sink for the `$out` stage.
pub type OutSink = Rc<RefCell<Vec<Value>>>;

/// Evaluation context: the root document `$$ROOT` refers to, bound
/// variables, and engine configuration.
///
/// Contexts are cheap to clone; variable binding and re-rooting produce
/// derived contexts rather than mutating in place.
#[derive(Clone)]
pub struct EvalContext {
    root: Rc<Value>,
    vars: HashMap<String, Value>,
    config: Config,
    collation: Option<Collation>,
    sink: Option<OutSink>,
}

impl EvalContext {
    pub fn new(root: &Value, config: Config) -> EvalContext {
        EvalContext {
            root: Rc::new(root.clone()),
            vars: HashMap::new(),
            config,
            collation: None,
            sink: None,
        }
    }

    /// Derived context rooted at a new top-level document, with variables
    /// cleared. Pipeline stages call this once per pulled document.
    pub fn for_doc(&self, doc: &Value) -> EvalContext {
        EvalContext {
            root: Rc::new(doc.clone()),
            vars: HashMap::new(),
            config: self.config.clone(),
            collation: self.collation.clone(),
            sink: self.sink.clone(),
        }
    }

    /// Derived context with one extra bound variable (`$$this`,
    /// `$$value`, `$let` bindings).
    pub fn with_var(&self, name: &str, value: Value) -> EvalContext {
        let mut ctx = self.clone();
        ctx.vars.insert(name.to_string(), value);
        ctx
    }

    pub fn with_collation(mut self, collation: Option<Collation>) -> EvalContext {
        self.collation = collation;
        self
    }

    pub fn with_sink(mut self, sink: Option<OutSink>) -> EvalContext {
        self.sink = sink;
        self
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn id_key(&self) -> &str {
        &self.config.id_key
    }

    pub fn collation(&self) -> Option<&Collation> {
        self.collation.as_ref()
    }

    pub fn sink(&self) -> Option<&OutSink> {
        self.sink.as_ref()
    }
}

/// Evaluate an expression tree against a document.
///
/// Dispatch order, first match wins:
/// 1. `operator` names an expression operator: invoke it with the raw
///    argument expression.
/// 2. `operator` names a group accumulator: fully evaluate the argument
///    (must yield an array), then reduce it.
/// 3. A `$`-prefixed string: field reference or system variable.
/// 4. An array: evaluate element-wise (the operator name does not
///    propagate to elements).
/// 5. An object: evaluate each value; an object whose single key is an
///    operator collapses to that operator's result, and an operator key
///    next to other keys is an error.
/// 6. Anything else evaluates to itself.
///
/// The single-operator-key collapse is what makes `{"$add": [...]}`
/// behave as a scalar while `{"a": 1, "b": {"$add": [...]}}` behaves as
/// an object template.
pub fn compute_value(
    doc: &Value,
    expr: &Value,
    operator: Option<&str>,
    ctx: &EvalContext,
) -> Result<Value> {
    if let Some(op) = operator {
        if let Some(f) = registry::lookup_expression(op) {
            return f(doc, expr, ctx);
        }
        if let Some(f) = registry::lookup_group(op) {
            let computed = compute_value(doc, expr, None, ctx)?;
            let Value::Array(items) = computed else {
                return Err(Error::Type(format!(
                    "accumulator {} expects an array argument, got {}",
                    op,
                    computed.type_name()
                )));
            };
            return f(&items);
        }
        return Err(Error::UnknownOperator(OperatorClass::Expression, op.to_string()));
    }
    match expr {
        Value::String(s) if s.starts_with('$') => resolve_reference(doc, s, ctx),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(compute_value(doc, item, None, ctx)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(obj) => {
            let operator_key = obj
                .keys()
                .find(|k| registry::is_expression_op(k) || registry::is_group_op(k));
            if let Some(key) = operator_key {
                if obj.len() != 1 {
                    return Err(Error::Type(format!(
                        "ambiguous expression: operator {} mixed with other keys",
                        key
                    )));
                }
                return compute_value(doc, &obj[key], Some(key.as_str()), ctx);
            }
            let mut out = Map::new();
            for (k, v) in obj {
                let computed = compute_value(doc, v, None, ctx)?;
                if !computed.is_missing() {
                    out.insert(k.clone(), computed);
                }
            }
            Ok(Value::Object(out))
        }
        _ => Ok(expr.clone()),
    }
}

/// Resolve a `$`-prefixed string: `$$`-variables (with optional trailing
/// path re-rooted at the variable's value) or a plain field selector.
fn resolve_reference(doc: &Value, s: &str, ctx: &EvalContext) -> Result<Value> {
    if let Some(rest) = s.strip_prefix("$$") {
        let (name, tail) = match rest.find('.') {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };
        let base = match name {
            "ROOT" => ctx.root().clone(),
            "CURRENT" => doc.clone(),
            "REMOVE" => Value::Missing,
            // Redact sentinels pass through as literal strings for the
            // caller to interpret
            "KEEP" | "PRUNE" | "DESCEND" => {
                if tail.is_some() {
                    return Err(Error::Type(format!("cannot take a path off $${}", name)));
                }
                return Ok(Value::String(format!("$${}", name)));
            }
            other => ctx
                .var(other)
                .cloned()
                .ok_or_else(|| Error::Type(format!("undefined variable $${}", other)))?,
        };
        Ok(match tail {
            Some(t) => path::resolve(&base, t),
            None => base,
        })
    } else {
        Ok(path::resolve(doc, &s[1..]))
    }
}
