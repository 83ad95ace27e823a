//! Template engine errors

use thiserror::Error;

/// Errors produced while validating, merging, rendering or diffing templates
///
/// Every variant describes a problem with caller input or template content,
/// so messages are surfaced verbatim on request conditions.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Input failed JSON Schema validation
    #[error("{0}")]
    InvalidInput(String),

    /// Schema is malformed or lacks an expected section
    #[error("{0}")]
    Schema(String),

    /// Values of incompatible types met during a merge
    #[error("{0}")]
    TypeMismatch(String),

    /// A required field is absent, empty or of the wrong type
    #[error("{0}")]
    MissingField(String),

    /// Interface labels or MAC addresses could not be resolved
    #[error("{0}")]
    Interface(String),

    /// Document structure does not match what rendering expects
    #[error("{0}")]
    InvalidDocument(String),

    /// YAML document could not be parsed
    #[error("{0}")]
    Yaml(String),
}

/// JSON type name of a value, as used in error messages
pub fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
