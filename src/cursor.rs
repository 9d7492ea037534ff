//! Cursors over query results.
//!
//! A [`Cursor`] couples a compiled [`Query`] and an optional projection
//! to a source collection. The underlying lazy sequence is built on
//! first use and cached; `skip`/`limit`/`sort` modifiers therefore only
//! take effect before the first pull. A one-element lookahead buffer
//! gives `has_next` peek semantics without losing elements.

use crate::error::{Error, Result};
use crate::eval::EvalContext;
use crate::lazy::Lazy;
use crate::ops::pipeline::{
    Projection, compile_projection, compile_sort_spec, filter_by_query, project_doc, sort_docs,
};
use crate::query::Query;
use crate::value::Value;

pub struct Cursor {
    source: Option<Vec<Value>>,
    query: Query,
    projection: Option<Projection>,
    sort_spec: Option<Vec<(String, i64)>>,
    skip_count: Option<usize>,
    limit_count: Option<usize>,
    seq: Option<Lazy>,
    lookahead: Vec<Value>,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("query", &self.query)
            .field("sort_spec", &self.sort_spec)
            .field("skip_count", &self.skip_count)
            .field("limit_count", &self.limit_count)
            .field("lookahead", &self.lookahead)
            .finish()
    }
}

impl Cursor {
    /// Couple a query and optional projection document to a source
    /// collection. The projection compiles eagerly, so a malformed
    /// projection fails here rather than at iteration time.
    pub fn new(source: Vec<Value>, query: Query, projection: Option<Value>) -> Result<Cursor> {
        let projection = match projection {
            Some(spec) => Some(compile_projection(&spec, &query.config().id_key)?),
            None => None,
        };
        Ok(Cursor {
            source: Some(source),
            query,
            projection,
            sort_spec: None,
            skip_count: None,
            limit_count: None,
            seq: None,
            lookahead: Vec::new(),
        })
    }

    /// Skip the first `n` results. Only effective before iteration
    /// starts.
    pub fn skip(mut self, n: usize) -> Cursor {
        self.skip_count = Some(n);
        self
    }

    /// Yield at most `n` results. Only effective before iteration
    /// starts.
    pub fn limit(mut self, n: usize) -> Cursor {
        self.limit_count = Some(n);
        self
    }

    /// Sort results by the given `{field: 1|-1}` specification. Only
    /// effective before iteration starts.
    pub fn sort(mut self, spec: Value) -> Result<Cursor> {
        self.sort_spec = Some(compile_sort_spec(&spec)?);
        Ok(self)
    }

    /// Build the underlying sequence, inserting a synthetic projection
    /// stage when one was requested.
    fn seq(&mut self) -> Result<&mut Lazy> {
        if self.seq.is_none() {
            let docs = self.source.take().unwrap_or_default();
            let mut seq = filter_by_query(Lazy::from_vec(docs), self.query.clone());
            if let Some(spec) = self.sort_spec.take() {
                seq = seq.transform(move |mut docs| {
                    sort_docs(&mut docs, &spec, None);
                    Ok(docs)
                });
            }
            if let Some(n) = self.skip_count {
                seq = seq.drop(n);
            }
            if let Some(n) = self.limit_count {
                seq = seq.take(n);
            }
            if let Some(proj) = self.projection.take() {
                let ctx = EvalContext::new(&Value::Null, self.query.config().clone());
                seq = seq.map(move |doc| project_doc(&doc, &proj, &ctx.for_doc(&doc)));
            }
            self.seq = Some(seq);
        }
        match &mut self.seq {
            Some(seq) => Ok(seq),
            None => Err(Error::Query("cursor sequence not built".to_string())),
        }
    }

    /// Is another result available? Buffers one element so a subsequent
    /// [`next`](Cursor::next) returns it.
    pub fn has_next(&mut self) -> Result<bool> {
        if !self.lookahead.is_empty() {
            return Ok(true);
        }
        match self.seq()?.next() {
            Some(item) => {
                self.lookahead.push(item?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pull the next result.
    pub fn next(&mut self) -> Result<Option<Value>> {
        if let Some(buffered) = self.lookahead.pop() {
            return Ok(Some(buffered));
        }
        self.seq()?.next().transpose()
    }

    /// Materialize all remaining results.
    pub fn all(mut self) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        while let Some(doc) = self.next()? {
            out.push(doc);
        }
        Ok(out)
    }

    /// Count the remaining results.
    pub fn count(mut self) -> Result<usize> {
        let mut n = 0;
        while self.next()?.is_some() {
            n += 1;
        }
        Ok(n)
    }

    /// Map the remaining results through a function.
    pub fn map<T, F>(mut self, mut f: F) -> Result<Vec<T>>
    where
        F: FnMut(Value) -> T,
    {
        let mut out = Vec::new();
        while let Some(doc) = self.next()? {
            out.push(f(doc));
        }
        Ok(out)
    }

    /// Visit each remaining result.
    pub fn for_each<F>(mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Value),
    {
        while let Some(doc) = self.next()? {
            f(&doc);
        }
        Ok(())
    }
}
