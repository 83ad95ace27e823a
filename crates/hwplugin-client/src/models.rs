//! Hardware plugin provisioning API models
//!
//! Field names follow the plugin's JSON wire format (camelCase).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// NodeAllocationRequest condition reporting hardware provisioning
pub const CONDITION_PROVISIONED: &str = "Provisioned";

/// NodeAllocationRequest condition reporting hardware configuration
pub const CONDITION_CONFIGURED: &str = "Configured";

/// Reason reported by the plugin for a terminal failure
pub const REASON_FAILED: &str = "Failed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiVersion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiVersions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri_prefix: Option<String>,

    #[serde(default)]
    pub api_versions: Vec<ApiVersion>,
}

/// Node group description sent to the plugin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupData {
    pub name: String,
    pub role: String,
    pub hw_profile: String,
    #[serde(default, alias = "resourceGroupId", skip_serializing_if = "Option::is_none")]
    pub resource_pool_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    pub node_group_data: NodeGroupData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_names: Vec<String>,
    pub size: u32,
}

/// Body of create and update calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationRequest {
    pub cluster_id: String,
    #[serde(default)]
    pub site: String,
    pub boot_interface_label: String,
    pub node_group: Vec<NodeGroup>,
    /// Generation of the ProvisioningRequest that produced this request
    pub config_transaction_id: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, String>,
}

/// Condition as reported by the plugin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationRequestStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selected_groups: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_config_transaction_id: Option<i64>,
}

/// NodeAllocationRequest as returned by the plugin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationRequestResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_allocation_request: Option<NodeAllocationRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeAllocationRequestStatus>,
}

impl NodeAllocationRequestResponse {
    pub fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == condition_type)
    }

    pub fn observed_config_transaction_id(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.observed_config_transaction_id)
    }

    pub fn node_groups(&self) -> &[NodeGroup] {
        self.node_allocation_request
            .as_ref()
            .map_or(&[], |r| r.node_group.as_slice())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Bmc {
    pub address: String,
    pub credentials_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedNodeStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A node granted to a NodeAllocationRequest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedNode {
    pub id: String,
    pub group_name: String,
    #[serde(default)]
    pub hw_profile: String,
    #[serde(default)]
    pub bmc: Bmc,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub config_transaction_id: i64,
    #[serde(default)]
    pub status: AllocatedNodeStatus,
}

/// RFC 7807 problem details
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}
