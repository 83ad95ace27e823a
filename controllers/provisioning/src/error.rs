//! Controller-specific error types.
//!
//! Library errors convert into [`ControllerError`]; the reconciler uses
//! [`ControllerError::is_input_error`] to decide between marking a condition
//! Failed and retrying with backoff.

use hwplugin_client::HwPluginError;
use kube::Error as KubeError;
use template_engine::TemplateError;
use thiserror::Error;

/// Errors that can occur in the provisioning controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Hardware plugin API error
    #[error("Hardware plugin error: {0}")]
    HwPlugin(#[from] HwPluginError),

    /// Template parameters or defaults are invalid
    #[error("{0}")]
    Template(#[from] TemplateError),

    /// Resource store error that is not a Kubernetes API error
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid user input on a request or template
    #[error("{0}")]
    Input(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Optimistic concurrency conflict on a status write
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl ControllerError {
    /// Whether retrying without a spec change cannot succeed
    pub fn is_input_error(&self) -> bool {
        matches!(self, ControllerError::Input(_) | ControllerError::Template(_))
    }

    /// Whether the error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            ControllerError::Conflict(_) => true,
            ControllerError::Kube(KubeError::Api(response)) => response.code == 409,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_error_classification() {
        assert!(ControllerError::Input("bad".to_string()).is_input_error());
        assert!(ControllerError::Template(TemplateError::MissingField("spec.clusterName must be provided".to_string()))
            .is_input_error());
        assert!(!ControllerError::Store("unavailable".to_string()).is_input_error());
        assert!(!ControllerError::HwPlugin(HwPluginError::Api("boom".to_string())).is_input_error());
    }

    #[test]
    fn test_template_error_message_is_verbatim() {
        let err = ControllerError::from(TemplateError::Interface("'label' is missing for interface: eno1".to_string()));
        assert_eq!(err.to_string(), "'label' is missing for interface: eno1");
    }

    #[test]
    fn test_conflict_detection() {
        assert!(ControllerError::Conflict("stale".to_string()).is_conflict());
        assert!(!ControllerError::Input("x".to_string()).is_conflict());
    }
}
