//! nutmeg is a MongoDB-flavored query and aggregation engine for
//! in-memory JSON documents.
//!
//! Hand it a collection of documents and a declarative criteria or
//! pipeline document and it evaluates them in process: no storage, no
//! network, no indexes, just the query language.
//!
//! ```
//! use serde_json::json;
//! use nutmeg::{find, Value};
//!
//! let docs: Vec<Value> = [json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]
//!     .map(Value::from)
//!     .to_vec();
//! let matched = find(&docs, Value::from(json!({"a": {"$gt": 1}})), None)
//!     .unwrap()
//!     .all()
//!     .unwrap();
//! assert_eq!(matched.len(), 2);
//! ```

pub mod aggregator;
#[cfg(feature = "cli")]
pub mod cli;
pub mod codec;
pub mod cursor;
pub mod error;
pub mod eval;
pub mod json;
pub mod lazy;
mod ops;
pub mod path;
pub mod query;
pub mod registry;
pub mod value;

pub use aggregator::{AggregateOptions, Aggregator};
pub use cursor::Cursor;
pub use error::{Error, Result};
pub use eval::{Collation, Config, EvalContext, OutSink, compute_value};
pub use lazy::Lazy;
pub use query::Query;
pub use registry::{
    ExpressionFn, GroupFn, OperatorClass, OperatorContext, OperatorImpl, PipelineFn,
    ProjectionFn, QueryFn, add_operators, names_of,
};
pub use value::{Map, Value};

/// Find the documents of a collection matching a criteria document,
/// optionally projected.
pub fn find(collection: &[Value], criteria: Value, projection: Option<Value>) -> Result<Cursor> {
    Query::new(criteria)?.find(collection, projection)
}

/// The documents of a collection NOT matching the criteria.
pub fn remove(collection: &[Value], criteria: Value) -> Result<Vec<Value>> {
    Query::new(criteria)?.remove(collection)
}

/// Run an aggregation pipeline over a collection with default options.
pub fn aggregate(collection: &[Value], stages: Vec<Value>) -> Result<Vec<Value>> {
    Aggregator::new(stages).run(collection, None)
}

/// Run an aggregation pipeline with explicit options (identity key,
/// collation, `$out` sink).
pub fn aggregate_with(
    collection: &[Value],
    stages: Vec<Value>,
    options: AggregateOptions,
) -> Result<Vec<Value>> {
    Aggregator::with_options(stages, options).run(collection, None)
}
