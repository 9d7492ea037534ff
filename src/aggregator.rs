//! Aggregation pipeline driver.
//!
//! An [`Aggregator`] holds the stage documents of a pipeline; each
//! [`run`](Aggregator::run)/[`stream`](Aggregator::stream) call folds
//! the stages left to right over a fresh lazy sequence, so an aggregator
//! is freely reusable across collections.

use crate::error::{Error, Result};
use crate::eval::{Collation, Config, EvalContext, OutSink};
use crate::lazy::Lazy;
use crate::ops::pipeline::filter_by_query;
use crate::query::Query;
use crate::registry::{self, OperatorClass};
use crate::value::Value;

/// Options threaded through a pipeline run.
#[derive(Clone, Default)]
pub struct AggregateOptions {
    pub config: Config,
    /// String collation applied by `$sort`.
    pub collation: Option<Collation>,
    /// Destination for the `$out` stage.
    pub sink: Option<OutSink>,
}

/// A reusable aggregation pipeline.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use nutmeg::{Aggregator, Value};
///
/// let docs: Vec<Value> = [json!({"a": 1}), json!({"a": 1}), json!({"a": 2})]
///     .map(Value::from)
///     .to_vec();
/// let agg = Aggregator::new(vec![Value::from(json!(
///     {"$group": {"_id": "$a", "count": {"$sum": 1}}}
/// ))]);
/// let out = agg.run(&docs, None).unwrap();
/// assert_eq!(out.len(), 2);
/// ```
pub struct Aggregator {
    stages: Vec<Value>,
    options: AggregateOptions,
}

impl Aggregator {
    pub fn new(stages: Vec<Value>) -> Aggregator {
        Aggregator {
            stages,
            options: AggregateOptions::default(),
        }
    }

    pub fn with_options(stages: Vec<Value>, options: AggregateOptions) -> Aggregator {
        Aggregator { stages, options }
    }

    /// Sub-pipeline construction for `$facet`: inherit the enclosing
    /// run's configuration, collation and sink.
    pub(crate) fn for_context(stages: Vec<Value>, ctx: &EvalContext) -> Aggregator {
        Aggregator {
            stages,
            options: AggregateOptions {
                config: ctx.config().clone(),
                collation: ctx.collation().cloned(),
                sink: ctx.sink().cloned(),
            },
        }
    }

    /// Fold the pipeline stages over a collection, returning the
    /// resulting lazy sequence. An optional pre-compiled query filters
    /// the collection before the first stage.
    pub fn stream(&self, collection: &[Value], query: Option<&Query>) -> Result<Lazy> {
        let base = EvalContext::new(&Value::Null, self.options.config.clone())
            .with_collation(self.options.collation.clone())
            .with_sink(self.options.sink.clone());
        let mut seq = Lazy::from_vec(collection.to_vec());
        if let Some(query) = query {
            seq = filter_by_query(seq, query.clone());
        }
        for stage in &self.stages {
            let obj = stage.as_object().filter(|m| m.len() == 1).ok_or_else(|| {
                Error::Pipeline("each pipeline stage must be a single-operator object".to_string())
            })?;
            for (name, args) in obj {
                let f = registry::lookup_pipeline(name).ok_or_else(|| {
                    Error::UnknownOperator(OperatorClass::Pipeline, name.clone())
                })?;
                log::trace!("applying pipeline stage {}", name);
                seq = f(seq, args, &base)?;
            }
        }
        Ok(seq)
    }

    /// Run the pipeline to completion and materialize the result.
    pub fn run(&self, collection: &[Value], query: Option<&Query>) -> Result<Vec<Value>> {
        self.stream(collection, query)?.value()
    }
}
