//! ClusterTemplate CRD
//!
//! A versioned template: default ConfigMaps for the ClusterInstance and the
//! policy templates, an optional HardwareTemplate, and the JSON Schema that
//! ProvisioningRequest parameters must satisfy.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{is_condition_true, Condition};
use crate::schema::preserve_unknown_fields;

/// Condition type recording the outcome of template validation
pub const CLUSTER_TEMPLATE_VALIDATED: &str = "ClusterTemplateValidated";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "clcm.openshift.io",
    version = "v1alpha1",
    kind = "ClusterTemplate",
    namespaced,
    status = "ClusterTemplateStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTemplateSpec {
    /// Template name; the resource is named `<name>.<version>`
    pub name: String,

    /// Template version
    pub version: String,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// Referenced default documents
    pub templates: Templates,

    /// JSON Schema for ProvisioningRequest `templateParameters`
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub template_parameter_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Templates {
    /// ConfigMap holding the ClusterInstance defaults
    pub cluster_instance_defaults: String,

    /// ConfigMap holding the policy template defaults
    pub policy_template_defaults: String,

    /// HardwareTemplate name (absent for clusters without managed hardware)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hw_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTemplateStatus {
    /// Validation conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Generation last validated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ClusterTemplate {
    /// Whether the template passed validation
    pub fn is_validated(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| is_condition_true(&s.conditions, CLUSTER_TEMPLATE_VALIDATED))
    }

    /// Whether the current generation has already been validated
    pub fn is_generation_validated(&self) -> bool {
        let observed = self.status.as_ref().and_then(|s| s.observed_generation);
        observed.is_some() && observed == self.metadata.generation
    }
}
