//! Criteria compilation and document matching.
//!
//! A [`Query`] compiles its criteria document eagerly into a list of
//! predicate closures; a document matches iff every predicate passes.
//! Compilation failures (unknown top-level operators, malformed
//! combinator arguments) surface at construction, never at match time.

use std::rc::Rc;

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::eval::{Config, EvalContext, compute_value};
use crate::path;
use crate::registry::{self, OperatorClass};
use crate::value::{Map, Value};

type Predicate = Rc<dyn Fn(&Value) -> Result<bool>>;

/// A compiled criteria document.
///
/// Compilation happens once at construction; the query is then reusable
/// across any number of [`test`](Query::test) calls.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use nutmeg::{Query, Value};
///
/// let query = Query::new(Value::from(json!({"age": {"$gte": 18}}))).unwrap();
/// assert!(query.test(&Value::from(json!({"age": 21}))).unwrap());
/// assert!(!query.test(&Value::from(json!({"age": 9}))).unwrap());
/// ```
#[derive(Clone)]
pub struct Query {
    criteria: Value,
    config: Config,
    predicates: Vec<Predicate>,
    // Native predicates registered through `and_where`, always run after
    // the compiled criteria
    where_predicates: Vec<Rc<dyn Fn(&Value) -> bool>>,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("criteria", &self.criteria)
            .field("config", &self.config)
            .field("predicates", &self.predicates.len())
            .field("where_predicates", &self.where_predicates.len())
            .finish()
    }
}

impl Query {
    /// Compile a criteria document with the default configuration.
    pub fn new(criteria: Value) -> Result<Query> {
        Query::with_config(criteria, Config::default())
    }

    /// Compile a criteria document against an explicit configuration.
    pub fn with_config(criteria: Value, config: Config) -> Result<Query> {
        let predicates = compile(&criteria, &config)?;
        log::debug!("compiled criteria into {} predicate(s)", predicates.len());
        Ok(Query {
            criteria,
            config,
            predicates,
            where_predicates: Vec::new(),
        })
    }

    /// Append a native predicate, evaluated against the whole document
    /// after every compiled criteria predicate.
    ///
    /// This is the engine's replacement for the `$where` operator:
    /// criteria documents are plain data and cannot carry functions, so
    /// a literal `$where` key is rejected at compile time and callers
    /// attach code through this builder instead.
    pub fn and_where<F>(mut self, f: F) -> Query
    where
        F: Fn(&Value) -> bool + 'static,
    {
        self.where_predicates.push(Rc::new(f));
        self
    }

    /// The raw criteria this query was compiled from.
    pub fn criteria(&self) -> &Value {
        &self.criteria
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Test a document: true iff every predicate passes.
    pub fn test(&self, doc: &Value) -> Result<bool> {
        for pred in &self.predicates {
            if !pred(doc)? {
                return Ok(false);
            }
        }
        Ok(self.where_predicates.iter().all(|pred| pred(doc)))
    }

    /// Open a cursor over the matching documents of a collection.
    pub fn find(&self, collection: &[Value], projection: Option<Value>) -> Result<Cursor> {
        Cursor::new(collection.to_vec(), self.clone(), projection)
    }

    /// The documents that do NOT match, i.e. the collection after
    /// removing every match.
    pub fn remove(&self, collection: &[Value]) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        for doc in collection {
            if !self.test(doc)? {
                out.push(doc.clone());
            }
        }
        Ok(out)
    }
}

fn compile(criteria: &Value, config: &Config) -> Result<Vec<Predicate>> {
    let obj = criteria
        .as_object()
        .ok_or_else(|| Error::Query("criteria must be an object".to_string()))?;
    let mut predicates: Vec<Predicate> = Vec::new();
    for (key, value) in obj {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                predicates.push(compile_combinator(key, value, config)?);
            }
            "$expr" => {
                let expr = value.clone();
                let config = config.clone();
                predicates.push(Rc::new(move |doc| {
                    let ctx = EvalContext::new(doc, config.clone());
                    Ok(compute_value(doc, &expr, None, &ctx)?.is_truthy())
                }));
            }
            "$where" => {
                return Err(Error::Query(
                    "$where is not supported; attach a native predicate with Query::and_where"
                        .to_string(),
                ));
            }
            key if key.starts_with('$') => {
                return Err(Error::Query(format!("unknown top level operator: {}", key)));
            }
            selector => {
                for (op, cond) in normalize(value)? {
                    let f = registry::lookup_query(&op)
                        .ok_or_else(|| Error::UnknownOperator(OperatorClass::Query, op.clone()))?;
                    let selector = selector.to_string();
                    predicates.push(Rc::new(move |doc| {
                        let lhs = path::resolve(doc, &selector);
                        f(&selector, &lhs, &cond)
                    }));
                }
            }
        }
    }
    Ok(predicates)
}

fn compile_combinator(op: &str, value: &Value, config: &Config) -> Result<Predicate> {
    let parts = value
        .as_array()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| Error::Query(format!("{}: expected a non-empty array", op)))?;
    let queries: Vec<Query> = parts
        .iter()
        .map(|sub| Query::with_config(sub.clone(), config.clone()))
        .collect::<Result<_>>()?;
    let op = op.to_string();
    Ok(Rc::new(move |doc| {
        let mut any = false;
        let mut all = true;
        for query in &queries {
            if query.test(doc)? {
                any = true;
            } else {
                all = false;
            }
        }
        Ok(match op.as_str() {
            "$and" => all,
            "$or" => any,
            _ => !any, // $nor
        })
    }))
}

/// Normalize a field condition into `(operator, argument)` pairs.
///
/// Bare values and regexes become `$eq`/`$regex`; an object whose keys
/// are all `$`-prefixed is used as-is (with `$regex` + `$options` merged
/// into one compiled regex); any other object is an `$eq` literal.
fn normalize(value: &Value) -> Result<Vec<(String, Value)>> {
    match value {
        Value::Regex(_) => Ok(vec![("$regex".to_string(), value.clone())]),
        Value::Object(obj) if is_operator_object(obj) => {
            let mut pairs = Vec::new();
            let options = obj.get("$options").and_then(Value::as_str);
            for (op, cond) in obj {
                match op.as_str() {
                    "$options" => {}
                    "$regex" => {
                        pairs.push(("$regex".to_string(), build_regex(cond, options)?));
                    }
                    _ => pairs.push((op.clone(), cond.clone())),
                }
            }
            Ok(pairs)
        }
        _ => Ok(vec![("$eq".to_string(), value.clone())]),
    }
}

fn is_operator_object(obj: &Map) -> bool {
    !obj.is_empty() && obj.keys().all(|k| k.starts_with('$'))
}

/// Merge a `$regex` pattern with its `$options` flags into a compiled
/// regex value. Supported flags: `i`, `m`, `s`, `x`.
fn build_regex(pattern: &Value, options: Option<&str>) -> Result<Value> {
    let source = match pattern {
        Value::Regex(re) => re.as_str().to_string(),
        Value::String(s) => s.clone(),
        other => {
            return Err(Error::Query(format!(
                "$regex: expected a regex or string, got {}",
                other.type_name()
            )));
        }
    };
    let source = match options {
        None | Some("") => source,
        Some(flags) => {
            if flags.bytes().any(|b| !matches!(b, b'i' | b'm' | b's' | b'x')) {
                return Err(Error::Query(format!("$options: invalid flags '{}'", flags)));
            }
            format!("(?{}){}", flags, source)
        }
    };
    regex::Regex::new(&source)
        .map(Value::Regex)
        .map_err(|e| Error::Query(format!("$regex: invalid pattern: {}", e)))
}
