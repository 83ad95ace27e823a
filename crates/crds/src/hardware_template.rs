//! HardwareTemplate CRD
//!
//! Describes the node groups to request from a hardware plugin.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "clcm.openshift.io",
    version = "v1alpha1",
    kind = "HardwareTemplate",
    namespaced,
    status = "HardwareTemplateStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HardwareTemplateSpec {
    /// Name of the HardwarePlugin serving this template
    pub hardware_plugin_ref: String,

    /// Interface label identifying the boot interface
    pub boot_interface_label: String,

    /// Node groups to allocate
    pub node_group_data: Vec<NodeGroupData>,

    /// Hardware provisioning timeout (e.g. "90m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_provisioning_timeout: Option<String>,

    /// Plugin-specific extensions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupData {
    /// Group name
    pub name: String,

    /// Node role served by this group (master, worker)
    pub role: String,

    /// Hardware profile requested for the group
    pub hw_profile: String,

    /// Resource pool to allocate from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pool_id: Option<String>,

    /// Explicit group size; computed from the cluster nodes when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareTemplateStatus {
    /// Validation conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl HardwareTemplateSpec {
    /// Check the fields required to render a NodeAllocationRequest
    pub fn validate(&self) -> Result<(), String> {
        if self.hardware_plugin_ref.is_empty() {
            return Err("hardwarePluginRef is empty".to_string());
        }
        if self.boot_interface_label.is_empty() {
            return Err("bootInterfaceLabel is empty".to_string());
        }
        if self.node_group_data.is_empty() {
            return Err("nodeGroupData is empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_fields() {
        let mut spec = HardwareTemplateSpec {
            hardware_plugin_ref: "metal3-hwplugin".to_string(),
            boot_interface_label: "bootable-interface".to_string(),
            node_group_data: vec![NodeGroupData {
                name: "controller".to_string(),
                role: "master".to_string(),
                hw_profile: "profile-spr-single-processor-64G".to_string(),
                ..Default::default()
            }],
            hardware_provisioning_timeout: None,
            extensions: BTreeMap::new(),
        };
        assert!(spec.validate().is_ok());

        spec.boot_interface_label.clear();
        assert_eq!(spec.validate().unwrap_err(), "bootInterfaceLabel is empty");
    }
}
