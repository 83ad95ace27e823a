//! ProvisioningRequest CRD
//!
//! A caller's request to provision an O-Cloud cluster from a ClusterTemplate.
//! The status carries the durable, resumable progress of the orchestrator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{condition_list, Condition, ConditionMap, ConditionType};
use crate::schema::preserve_unknown_fields;

/// Finalizer added on first reconcile and removed once deletion has completed
pub const PROVISIONING_REQUEST_FINALIZER: &str = "provisioningrequest.clcm.openshift.io/finalizer";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "clcm.openshift.io",
    version = "v1alpha1",
    kind = "ProvisioningRequest",
    shortname = "oranpr",
    status = "ProvisioningRequestStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.provisioningStatus.provisioningPhase"}"#,
    printcolumn = r#"{"name":"Details","type":"string","jsonPath":".status.provisioningStatus.provisioningDetails"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequestSpec {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// Name of the ClusterTemplate to provision from
    pub template_name: String,

    /// Version of the ClusterTemplate to provision from
    pub template_version: String,

    /// Input parameters, validated against the ClusterTemplate parameter schema
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub template_parameters: serde_json::Value,

    /// Opaque caller extensions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub extensions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequestStatus {
    /// Phase conditions, ordered by phase
    #[serde(default, with = "condition_list")]
    #[schemars(with = "Vec<Condition>")]
    pub conditions: ConditionMap,

    /// Overall provisioning status
    #[serde(default)]
    pub provisioning_status: ProvisioningStatus,

    /// Spec generation last validated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Progress bookkeeping for the individual phases
    #[serde(default)]
    pub extensions: ProvisioningExtensions,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningStatus {
    /// Overall phase derived from the conditions
    #[serde(default)]
    pub provisioning_phase: ProvisioningPhase,

    /// Message of the condition that determined the phase
    #[serde(default)]
    pub provisioning_details: String,

    /// Time of the last phase or details change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,

    /// Identifiers of the provisioned resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned_resources: Option<ProvisionedResources>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedResources {
    /// Cluster ID reported by the managed cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub o_cloud_cluster_id: Option<String>,

    /// Node cluster ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub o_cloud_node_cluster_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
/// Overall provisioning phase
///
/// Serializes as PascalCase but accepts lowercase values on read.
#[serde(rename_all = "PascalCase")]
pub enum ProvisioningPhase {
    /// No phase has started yet
    #[default]
    #[serde(alias = "pending")]
    Pending,

    /// At least one phase is in progress
    #[serde(alias = "progressing")]
    Progressing,

    /// All phases completed
    #[serde(alias = "fulfilled")]
    Fulfilled,

    /// A phase failed or timed out
    #[serde(alias = "failed")]
    Failed,

    /// Deletion in progress
    #[serde(alias = "deleting")]
    Deleting,
}

impl ProvisioningPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningPhase::Pending => "Pending",
            ProvisioningPhase::Progressing => "Progressing",
            ProvisioningPhase::Fulfilled => "Fulfilled",
            ProvisioningPhase::Failed => "Failed",
            ProvisioningPhase::Deleting => "Deleting",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningExtensions {
    /// Reference to the NodeAllocationRequest held by the hardware plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_allocation_request_ref: Option<NodeAllocationRequestRef>,

    /// Details of the installed cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_details: Option<ClusterDetails>,

    /// Allocated node id to host name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allocated_node_host_map: BTreeMap<String, String>,

    /// Compliance of the policies matched to the cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<PolicyDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationRequestRef {
    /// Identifier returned by the hardware plugin
    pub node_allocation_request_id: String,

    /// HardwarePlugin holding the request
    #[serde(default)]
    pub hardware_plugin_ref: String,

    /// Start of initial hardware provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_provisioning_check_start: Option<DateTime<Utc>>,

    /// Start of the latest hardware configuration update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_configuring_check_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDetails {
    /// Name of the ClusterInstance (and its namespace)
    pub name: String,

    /// First time the cluster installation was observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_provision_started_at: Option<DateTime<Utc>>,

    /// First time the policies were observed non-compliant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_compliant_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDetails {
    /// Compliance state reported by the policy framework
    pub compliant: String,

    /// Policy name
    pub policy_name: String,

    /// Policy namespace
    pub policy_namespace: String,

    /// inform or enforce
    pub remediation_action: String,
}

impl ProvisioningRequest {
    /// Name of the ClusterTemplate backing this request (`<name>.<version>`)
    pub fn cluster_template_ref_name(&self) -> String {
        format!("{}.{}", self.spec.template_name, self.spec.template_version)
    }
}

impl ProvisioningRequestStatus {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions.get(&condition_type)
    }

    pub fn is_condition_true(&self, condition_type: ConditionType) -> bool {
        self.condition(condition_type).is_some_and(Condition::is_true)
    }

    /// Derive the overall phase and details from the conditions
    ///
    /// Pending without conditions, Failed when any condition failed or timed
    /// out, Fulfilled when every phase is True, Progressing otherwise.
    pub fn derived_phase(&self) -> (ProvisioningPhase, String) {
        if self.conditions.is_empty() {
            return (ProvisioningPhase::Pending, "Provisioning request has been created".to_string());
        }

        if let Some(failed) = self.conditions.values().find(|c| c.is_failure()) {
            return (ProvisioningPhase::Failed, failed.message.clone());
        }

        if ConditionType::ALL.iter().all(|t| self.is_condition_true(*t)) {
            return (ProvisioningPhase::Fulfilled, "Provisioning request has completed successfully".to_string());
        }

        let details = ConditionType::ALL
            .iter()
            .find_map(|t| self.condition(*t).filter(|c| !c.is_true()))
            .map(|c| c.message.clone())
            .unwrap_or_default();
        (ProvisioningPhase::Progressing, details)
    }

    /// Set phase and details, moving `updateTime` only when either changes
    pub fn set_provisioning_state(&mut self, phase: ProvisioningPhase, details: impl Into<String>) -> bool {
        let details = details.into();
        let status = &mut self.provisioning_status;
        if status.provisioning_phase == phase && status.provisioning_details == details {
            return false;
        }
        status.provisioning_phase = phase;
        status.provisioning_details = details;
        status.update_time = Some(Utc::now());
        true
    }

    pub fn node_allocation_request_id(&self) -> Option<&str> {
        self.extensions
            .node_allocation_request_ref
            .as_ref()
            .map(|r| r.node_allocation_request_id.as_str())
            .filter(|id| !id.is_empty())
    }
}
