//! Pull-based lazy sequences.
//!
//! A [`Lazy`] wraps a source (an in-memory vector, a generator closure,
//! or a deferred thunk) plus an ordered list of pending per-element
//! operations. Each pull applies the operations in registration order;
//! `take`/`drop` counters are stateful and mutate across pulls. Once a
//! sequence reports `None` it is permanently done — sequences are single
//! pass and not restartable.
//!
//! Elements are `Result<Value>` so per-element evaluation failures
//! surface at pull time; termination is expressed through `Option`,
//! never through the error channel.

use std::collections::VecDeque;

use crate::error::Result;
use crate::value::Value;

enum Source {
    Items(std::vec::IntoIter<Value>),
    Gen(Box<dyn FnMut() -> Option<Result<Value>>>),
    Pending(Option<Box<dyn FnOnce() -> Result<Vec<Value>>>>),
}

enum Op {
    Map(Box<dyn FnMut(Value) -> Result<Value>>),
    Filter(Box<dyn FnMut(&Value) -> Result<bool>>),
    Take(usize),
    Drop(usize),
}

/// A single-pass, pull-based sequence of values with deferred
/// per-element operations.
pub struct Lazy {
    source: Source,
    ops: Vec<Op>,
    done: bool,
}

impl Lazy {
    /// Sequence over an in-memory vector.
    pub fn from_vec(items: Vec<Value>) -> Lazy {
        Lazy {
            source: Source::Items(items.into_iter()),
            ops: Vec::new(),
            done: false,
        }
    }

    /// Sequence driven by a generator closure; `None` terminates.
    pub fn generate<F>(f: F) -> Lazy
    where
        F: FnMut() -> Option<Result<Value>> + 'static,
    {
        Lazy {
            source: Source::Gen(Box::new(f)),
            ops: Vec::new(),
            done: false,
        }
    }

    /// Sequence whose items are produced by a thunk run on first pull.
    ///
    /// This is the synchronization point behind `transform`: nothing
    /// upstream runs until the first element is demanded, then the whole
    /// upstream materializes at once.
    pub fn deferred<F>(f: F) -> Lazy
    where
        F: FnOnce() -> Result<Vec<Value>> + 'static,
    {
        Lazy {
            source: Source::Pending(Some(Box::new(f))),
            ops: Vec::new(),
            done: false,
        }
    }

    /// Append a per-element mapping operation.
    pub fn map<F>(mut self, f: F) -> Lazy
    where
        F: FnMut(Value) -> Result<Value> + 'static,
    {
        self.ops.push(Op::Map(Box::new(f)));
        self
    }

    /// Append a per-element filtering operation.
    pub fn filter<F>(mut self, f: F) -> Lazy
    where
        F: FnMut(&Value) -> Result<bool> + 'static,
    {
        self.ops.push(Op::Filter(Box::new(f)));
        self
    }

    /// Yield at most `n` further elements.
    pub fn take(mut self, n: usize) -> Lazy {
        self.ops.push(Op::Take(n));
        self
    }

    /// Reject the next `n` elements that reach this operation.
    pub fn drop(mut self, n: usize) -> Lazy {
        self.ops.push(Op::Drop(n));
        self
    }

    /// Materialize the whole upstream once, reshape it, and continue
    /// lazily from the result. Used by whole-collection stages (`$sort`,
    /// `$group`, `$sample`, ...).
    pub fn transform<F>(self, f: F) -> Lazy
    where
        F: FnOnce(Vec<Value>) -> Result<Vec<Value>> + 'static,
    {
        Lazy::deferred(move || f(self.value()?))
    }

    /// Expand each element into zero or more output elements, preserving
    /// upstream order.
    pub fn flat_map<F>(self, mut f: F) -> Lazy
    where
        F: FnMut(Value) -> Result<Vec<Value>> + 'static,
    {
        let mut upstream = self;
        let mut buffer: VecDeque<Value> = VecDeque::new();
        Lazy::generate(move || {
            loop {
                if let Some(v) = buffer.pop_front() {
                    return Some(Ok(v));
                }
                match upstream.next()? {
                    Ok(v) => match f(v) {
                        Ok(items) => buffer.extend(items),
                        Err(e) => return Some(Err(e)),
                    },
                    Err(e) => return Some(Err(e)),
                }
            }
        })
    }

    /// Pull the next element, applying pending operations in order.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Result<Value>> {
        if self.done {
            return None;
        }
        'pull: loop {
            let item = match &mut self.source {
                Source::Items(iter) => iter.next().map(Ok),
                Source::Gen(f) => f(),
                Source::Pending(thunk) => match thunk.take() {
                    Some(thunk) => match thunk() {
                        Ok(items) => {
                            self.source = Source::Items(items.into_iter());
                            continue 'pull;
                        }
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    },
                    None => {
                        self.done = true;
                        return None;
                    }
                },
            };
            let mut value = match item {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(v)) => v,
            };
            for op in self.ops.iter_mut() {
                match op {
                    Op::Map(f) => match f(value) {
                        Ok(v) => value = v,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    },
                    Op::Filter(f) => match f(&value) {
                        Ok(true) => {}
                        Ok(false) => continue 'pull,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    },
                    Op::Take(n) => {
                        if *n == 0 {
                            self.done = true;
                            return None;
                        }
                        *n -= 1;
                    }
                    Op::Drop(n) => {
                        if *n > 0 {
                            *n -= 1;
                            continue 'pull;
                        }
                    }
                }
            }
            return Some(Ok(value));
        }
    }

    /// Materialize all remaining elements.
    pub fn value(mut self) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        while let Some(item) = self.next() {
            out.push(item?);
        }
        Ok(out)
    }

    /// Pull at most one element.
    pub fn first(mut self) -> Result<Option<Value>> {
        self.next().transpose()
    }

    /// Visit each element; stop early when the visitor returns `false`.
    pub fn each<F>(mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Value) -> bool,
    {
        while let Some(item) = self.next() {
            if !f(&item?) {
                break;
            }
        }
        Ok(())
    }

    /// Fold all remaining elements into an accumulator.
    pub fn reduce<T, F>(mut self, init: T, mut f: F) -> Result<T>
    where
        F: FnMut(T, Value) -> T,
    {
        let mut acc = init;
        while let Some(item) = self.next() {
            acc = f(acc, item?);
        }
        Ok(acc)
    }

    /// Count the remaining elements.
    pub fn size(mut self) -> Result<usize> {
        let mut n = 0;
        while let Some(item) = self.next() {
            item?;
            n += 1;
        }
        Ok(n)
    }
}

impl Iterator for Lazy {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Result<Value>> {
        Lazy::next(self)
    }
}
