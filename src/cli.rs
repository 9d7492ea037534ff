//! Command-line front end: run criteria queries and aggregation
//! pipelines over a JSON array of documents.

use crate::json::from_json_slice;
use crate::value::Value;
use crate::{aggregate, find};

/// Errors surfaced by the CLI layer.
#[derive(Debug)]
pub enum CliError {
    /// Input or query text is not valid JSON
    Parse(String),

    /// Input JSON is not an array of documents
    Input(String),

    /// The engine rejected the criteria or pipeline
    Engine(crate::Error),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Parse(msg) => write!(f, "Parse error: {}", msg),
            CliError::Input(msg) => write!(f, "Input error: {}", msg),
            CliError::Engine(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {}

impl From<crate::Error> for CliError {
    fn from(e: crate::Error) -> CliError {
        CliError::Engine(e)
    }
}

fn parse_collection(input: &str) -> Result<Vec<Value>, CliError> {
    let parsed: serde_json::Value =
        serde_json::from_str(input).map_err(|e| CliError::Parse(e.to_string()))?;
    match parsed {
        serde_json::Value::Array(docs) => Ok(from_json_slice(&docs)),
        _ => Err(CliError::Input("expected a JSON array of documents".to_string())),
    }
}

fn parse_value(text: &str) -> Result<serde_json::Value, CliError> {
    serde_json::from_str(text).map_err(|e| CliError::Parse(e.to_string()))
}

fn render(docs: &[Value], pretty: bool) -> String {
    let out = serde_json::Value::Array(docs.iter().map(Value::to_json).collect());
    if pretty {
        serde_json::to_string_pretty(&out).unwrap_or_default()
    } else {
        serde_json::to_string(&out).unwrap_or_default()
    }
}

/// Run a criteria query over a JSON array and render the matches.
pub fn run_find(input: &str, criteria: &str, pretty: bool) -> Result<String, CliError> {
    let collection = parse_collection(input)?;
    let criteria = Value::from(parse_value(criteria)?);
    let matched = find(&collection, criteria, None)?.all()?;
    Ok(render(&matched, pretty))
}

/// Run an aggregation pipeline over a JSON array and render the result.
pub fn run_aggregate(input: &str, pipeline: &str, pretty: bool) -> Result<String, CliError> {
    let collection = parse_collection(input)?;
    let stages = match parse_value(pipeline)? {
        serde_json::Value::Array(stages) => from_json_slice(&stages),
        _ => return Err(CliError::Input("expected a JSON array of pipeline stages".to_string())),
    };
    let result = aggregate(&collection, stages)?;
    Ok(render(&result, pretty))
}
