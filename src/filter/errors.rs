use serde_json::Value;

use crate::bridge::BridgeError;

/// Errors raised while compiling or evaluating a filter.
#[derive(thiserror::Error, Debug)]
pub enum FilterError {
    #[error("unknown operator {0}")]
    UnknownOperator(String),

    #[error("invalid {operator} configuration: {message}")]
    Config { operator: String, message: String },

    #[error("{operator} expected a string at '{path}', got {found}")]
    TypeMismatch {
        operator: String,
        path: String,
        found: &'static str,
    },

    #[error("invalid date {value:?} at '{path}'")]
    InvalidDate { path: String, value: String },

    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error("embedding failed: {0}")]
    Embedding(#[from] BridgeError),

    #[error("malformed filter: {0}")]
    Malformed(String),
}

impl FilterError {
    pub fn config(operator: &str, message: impl Into<String>) -> Self {
        FilterError::Config {
            operator: operator.to_string(),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        FilterError::Malformed(message.into())
    }
}

pub type FilterResult<T> = Result<T, FilterError>;

/// JSON type name used in error messages; `None` is a missing field.
pub fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "missing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "bool",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}
