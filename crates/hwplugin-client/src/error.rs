//! Hardware plugin client errors

use thiserror::Error;

/// Errors that can occur when interacting with a hardware plugin
#[derive(Debug, Error)]
pub enum HwPluginError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Plugin API returned an unexpected response
    #[error("Hardware plugin API error: {0}")]
    Api(String),

    /// Plugin returned an RFC 7807 problem document
    #[error("failed to {action} {resource_type} '{id}': {status} - {detail}")]
    Problem {
        action: String,
        resource_type: String,
        id: String,
        status: String,
        code: u16,
        detail: String,
    },

    /// Plugin returned an error status without a usable problem document
    #[error("empty or unexpected error response for {resource_type} '{id}': {status}")]
    UnexpectedResponse {
        resource_type: String,
        id: String,
        status: String,
        code: u16,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflicting concurrent change on the plugin side
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed or credentials could not be loaded
    #[error("Authentication failed: {0}")]
    Authentication(String),
}

impl HwPluginError {
    /// HTTP status code carried by the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            HwPluginError::Problem { code, .. } | HwPluginError::UnexpectedResponse { code, .. } => Some(*code),
            HwPluginError::Http(e) => e.status().map(|s| s.as_u16()),
            HwPluginError::Conflict(_) => Some(409),
            HwPluginError::NotFound(_) => Some(404),
            _ => None,
        }
    }

    /// Whether the failure is transient (conflict, server error, connection failure)
    pub fn is_transient(&self) -> bool {
        match self {
            HwPluginError::Http(e) => e.is_connect() || e.is_timeout(),
            HwPluginError::Conflict(_) => true,
            other => other.status_code().is_some_and(|code| code >= 500),
        }
    }
}
