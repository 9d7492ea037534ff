//! Operator registry and dispatch.
//!
//! Operators are keyed by class and `$`-prefixed name. The registry is
//! process-wide, seeded with the built-in operators on first access, and
//! grows only through [`add_operators`]. Lookups clone the backing `Arc`
//! so no lock is held while an operator runs. Registration is expected
//! to happen before queries are evaluated; reads are safe to share once
//! the registry is stable.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{Error, Result};
use crate::eval::{EvalContext, compute_value};
use crate::lazy::Lazy;
use crate::ops;
use crate::value::Value;
use crate::{codec, path};

/// The five operator classes of the query language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorClass {
    /// Scalar expression operators (`$add`, `$concat`, ...)
    Expression,
    /// Group accumulators (`$sum`, `$push`, ...)
    Group,
    /// Aggregation pipeline stages (`$match`, `$group`, ...)
    Pipeline,
    /// Projection operators (`$slice`, `$elemMatch`)
    Projection,
    /// Query criteria operators (`$eq`, `$in`, ...)
    Query,
}

impl std::fmt::Display for OperatorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperatorClass::Expression => "expression",
            OperatorClass::Group => "group",
            OperatorClass::Pipeline => "pipeline",
            OperatorClass::Projection => "projection",
            OperatorClass::Query => "query",
        };
        f.write_str(name)
    }
}

/// Expression operator: `(current document, unevaluated argument
/// expression, evaluation context) -> value`. Arguments arrive
/// unevaluated so operators like `$literal` and `$cond` control their
/// own evaluation.
pub type ExpressionFn = Arc<dyn Fn(&Value, &Value, &EvalContext) -> Result<Value> + Send + Sync>;

/// Group accumulator: reduces the per-document computed values of one
/// group to a single summary value.
pub type GroupFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Pipeline stage: `(input sequence, stage argument, context) -> output
/// sequence`.
pub type PipelineFn = Arc<dyn Fn(Lazy, &Value, &EvalContext) -> Result<Lazy> + Send + Sync>;

/// Projection operator: `(document, argument expression, selector,
/// context) -> projected value`.
pub type ProjectionFn = Arc<dyn Fn(&Value, &Value, &str, &EvalContext) -> Result<Value> + Send + Sync>;

/// Query operator: `(selector, resolved left-hand value, condition) ->
/// match`.
pub type QueryFn = Arc<dyn Fn(&str, &Value, &Value) -> Result<bool> + Send + Sync>;

/// An operator implementation tagged with its class.
#[derive(Clone)]
pub enum OperatorImpl {
    Expression(ExpressionFn),
    Group(GroupFn),
    Pipeline(PipelineFn),
    Projection(ProjectionFn),
    Query(QueryFn),
}

impl OperatorImpl {
    fn class(&self) -> OperatorClass {
        match self {
            OperatorImpl::Expression(_) => OperatorClass::Expression,
            OperatorImpl::Group(_) => OperatorClass::Group,
            OperatorImpl::Pipeline(_) => OperatorClass::Pipeline,
            OperatorImpl::Projection(_) => OperatorClass::Projection,
            OperatorImpl::Query(_) => OperatorClass::Query,
        }
    }
}

#[derive(Default)]
pub struct Registry {
    entries: HashMap<(OperatorClass, String), OperatorImpl>,
}

fn valid_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('$') else {
        return false;
    };
    rest.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

impl Registry {
    fn with_builtins() -> Registry {
        let mut reg = Registry::default();
        ops::expression::install(&mut reg);
        ops::group::install(&mut reg);
        ops::pipeline::install(&mut reg);
        ops::projection::install(&mut reg);
        ops::query::install(&mut reg);
        reg
    }

    /// Insert a built-in operator. Names are code-controlled here, so no
    /// validation runs.
    pub(crate) fn builtin(&mut self, name: &str, op: OperatorImpl) {
        self.entries.insert((op.class(), name.to_string()), op);
    }

    /// Register an operator, validating its name and uniqueness within
    /// the class.
    pub fn register(&mut self, class: OperatorClass, name: &str, op: OperatorImpl) -> Result<()> {
        if !valid_name(name) {
            return Err(Error::InvalidOperatorName(name.to_string()));
        }
        if op.class() != class {
            return Err(Error::Type(format!(
                "operator {} implementation does not match class {}",
                name, class
            )));
        }
        if self.entries.contains_key(&(class, name.to_string())) {
            return Err(Error::DuplicateOperator(class, name.to_string()));
        }
        self.entries.insert((class, name.to_string()), op);
        Ok(())
    }

    fn lookup(&self, class: OperatorClass, name: &str) -> Option<OperatorImpl> {
        self.entries.get(&(class, name.to_string())).cloned()
    }

    fn names_of(&self, classes: &[OperatorClass]) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .keys()
            .filter(|(c, _)| classes.contains(c))
            .map(|(_, n)| n.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| RwLock::new(Registry::with_builtins()))
}

fn lookup(class: OperatorClass, name: &str) -> Option<OperatorImpl> {
    registry().read().ok()?.lookup(class, name)
}

pub(crate) fn lookup_expression(name: &str) -> Option<ExpressionFn> {
    match lookup(OperatorClass::Expression, name)? {
        OperatorImpl::Expression(f) => Some(f),
        _ => None,
    }
}

pub(crate) fn lookup_group(name: &str) -> Option<GroupFn> {
    match lookup(OperatorClass::Group, name)? {
        OperatorImpl::Group(f) => Some(f),
        _ => None,
    }
}

pub(crate) fn lookup_pipeline(name: &str) -> Option<PipelineFn> {
    match lookup(OperatorClass::Pipeline, name)? {
        OperatorImpl::Pipeline(f) => Some(f),
        _ => None,
    }
}

pub(crate) fn lookup_projection(name: &str) -> Option<ProjectionFn> {
    match lookup(OperatorClass::Projection, name)? {
        OperatorImpl::Projection(f) => Some(f),
        _ => None,
    }
}

pub(crate) fn lookup_query(name: &str) -> Option<QueryFn> {
    match lookup(OperatorClass::Query, name)? {
        OperatorImpl::Query(f) => Some(f),
        _ => None,
    }
}

pub(crate) fn is_expression_op(name: &str) -> bool {
    lookup(OperatorClass::Expression, name).is_some()
}

pub(crate) fn is_group_op(name: &str) -> bool {
    lookup(OperatorClass::Group, name).is_some()
}

/// Registered operator names across the given classes, sorted and
/// deduplicated.
pub fn names_of(classes: &[OperatorClass]) -> Vec<String> {
    registry()
        .read()
        .map(|reg| reg.names_of(classes))
        .unwrap_or_default()
}

/// Utility surface handed to [`add_operators`] factories so third-party
/// operators can be written against stable entry points instead of crate
/// internals.
pub struct OperatorContext {
    _private: (),
}

impl OperatorContext {
    /// Resolve a dot-path selector against a document.
    pub fn resolve(&self, doc: &Value, selector: &str) -> Value {
        path::resolve(doc, selector)
    }

    /// Evaluate an expression tree against a document.
    pub fn compute_value(
        &self,
        doc: &Value,
        expr: &Value,
        operator: Option<&str>,
        ctx: &EvalContext,
    ) -> Result<Value> {
        compute_value(doc, expr, operator, ctx)
    }

    /// Canonical string encoding, suitable for hashing values.
    pub fn encode(&self, value: &Value) -> String {
        codec::encode(value)
    }

    /// Total order over values.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        a.compare(b)
    }

    /// Assert an operator argument contract, raising a type error with
    /// the given message otherwise.
    pub fn assert(&self, condition: bool, message: &str) -> Result<()> {
        if condition {
            Ok(())
        } else {
            Err(Error::Type(message.to_string()))
        }
    }
}

/// Extend the registry with user-defined operators.
///
/// The factory receives an [`OperatorContext`] exposing the engine's
/// utilities and returns `(name, implementation)` pairs to merge into
/// the given class. Fails without modifying the registry if any name is
/// malformed, collides, or carries an implementation of the wrong class.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use nutmeg::{add_operators, OperatorClass, OperatorImpl, Value};
///
/// add_operators(OperatorClass::Query, |_ctx| {
///     vec![(
///         "$isString".to_string(),
///         OperatorImpl::Query(Arc::new(|_sel, lhs, cond| {
///             Ok(matches!(lhs, Value::String(_)) == cond.is_truthy())
///         })),
///     )]
/// })
/// .unwrap();
/// ```
pub fn add_operators<F>(class: OperatorClass, factory: F) -> Result<()>
where
    F: FnOnce(&OperatorContext) -> Vec<(String, OperatorImpl)>,
{
    let ctx = OperatorContext { _private: () };
    let new_ops = factory(&ctx);
    let mut reg = registry()
        .write()
        .map_err(|_| Error::Type("operator registry poisoned".to_string()))?;
    // Validate everything before inserting anything
    for (name, op) in &new_ops {
        if !valid_name(name) {
            return Err(Error::InvalidOperatorName(name.clone()));
        }
        if op.class() != class {
            return Err(Error::Type(format!(
                "operator {} implementation does not match class {}",
                name, class
            )));
        }
        if reg.entries.contains_key(&(class, name.clone())) {
            return Err(Error::DuplicateOperator(class, name.clone()));
        }
    }
    log::debug!("registering {} user {} operator(s)", new_ops.len(), class);
    for (name, op) in new_ops {
        reg.entries.insert((class, name), op);
    }
    Ok(())
}
