use crate::registry::OperatorClass;

/// Errors raised by query compilation, operator registration, and
/// expression evaluation.
///
/// Soft failures never reach this type: resolving an absent path yields
/// [`Value::Missing`](crate::Value::Missing) and most numeric operators
/// propagate `Null` for nil input. An `Error` always means the caller
/// violated a contract, and it aborts the whole operation.
#[derive(Debug, Clone)]
pub enum Error {
    /// Operator name does not match `$[A-Za-z0-9_]*`
    InvalidOperatorName(String),

    /// Operator already registered under the same class
    DuplicateOperator(OperatorClass, String),

    /// Operator not registered under the expected class
    UnknownOperator(OperatorClass, String),

    /// Invalid criteria document (unknown top-level operator, malformed
    /// combinator argument, bad `$regex` options)
    Query(String),

    /// Invalid projection document (mixed inclusion/exclusion, bad
    /// `$slice`/`$elemMatch` argument)
    Projection(String),

    /// Invalid pipeline stage document (not a single-operator object,
    /// bad `$bucket` boundaries, missing `$lookup` fields)
    Pipeline(String),

    /// Wrong-arity or wrong-type operator argument during evaluation
    Type(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidOperatorName(name) => {
                write!(f, "invalid operator name '{}': must match $[A-Za-z0-9_]*", name)
            }
            Error::DuplicateOperator(class, name) => {
                write!(f, "operator {} already registered for class {}", name, class)
            }
            Error::UnknownOperator(class, name) => {
                write!(f, "unknown {} operator: {}", class, name)
            }
            Error::Query(msg) => write!(f, "query error: {}", msg),
            Error::Projection(msg) => write!(f, "projection error: {}", msg),
            Error::Pipeline(msg) => write!(f, "pipeline error: {}", msg),
            Error::Type(msg) => write!(f, "type error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
