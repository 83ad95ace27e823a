//! HardwareTemplateRendered and HardwareProvisioned phases

use std::collections::BTreeMap;

use chrono::Utc;
use crds::{ConditionReason, ConditionStatus, ConditionType, NodeAllocationRequestRef};
use hwplugin_client::{
    determine_action, NodeAllocationRequest, NodeAllocationRequestAction, NodeAllocationRequestResponse, NodeGroup,
    NodeGroupData, CONDITION_PROVISIONED, REASON_FAILED,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::context::TemplateContext;
use super::timeouts::timeout_exceeded;
use super::{Reconciler, RequestState, Requeue};
use crate::error::ControllerError;

/// Render the NodeAllocationRequest for the current generation of a request
///
/// Each group is sized by the number of cluster nodes carrying its role.
pub fn render_node_allocation_request(context: &TemplateContext, generation: i64) -> NodeAllocationRequest {
    let nodes = context
        .cluster_instance_input
        .get("nodes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let spec = &context.hardware_template.spec;

    let node_group = spec
        .node_group_data
        .iter()
        .map(|group| {
            let size = nodes
                .iter()
                .filter(|node| node.get("role").and_then(Value::as_str) == Some(group.role.as_str()))
                .count();
            NodeGroup {
                node_group_data: NodeGroupData {
                    name: group.name.clone(),
                    role: group.role.clone(),
                    hw_profile: group.hw_profile.clone(),
                    resource_pool_id: group.resource_pool_id.clone(),
                },
                node_names: Vec::new(),
                size: u32::try_from(size).unwrap_or(u32::MAX),
            }
        })
        .collect();

    NodeAllocationRequest {
        cluster_id: context.cluster_name.clone(),
        site: context.site_id.clone(),
        boot_interface_label: spec.boot_interface_label.clone(),
        node_group,
        config_transaction_id: generation,
        extensions: spec.extensions.clone(),
    }
}

/// Whether two node-group lists differ in anything but node names
pub fn node_groups_differ(current: &[NodeGroup], desired: &[NodeGroup]) -> bool {
    let key = |groups: &[NodeGroup]| -> BTreeMap<String, (NodeGroupData, u32)> {
        groups
            .iter()
            .map(|g| (g.node_group_data.name.clone(), (g.node_group_data.clone(), g.size)))
            .collect()
    };
    key(current) != key(desired)
}

/// Role to node-group name; the first group declaring a role wins
pub fn role_to_group(context: &TemplateContext) -> BTreeMap<String, String> {
    let mut roles = BTreeMap::new();
    for group in &context.hardware_template.spec.node_group_data {
        roles.entry(group.role.clone()).or_insert_with(|| group.name.clone());
    }
    roles
}

impl Reconciler {
    fn plugin_ref(state: &RequestState, context: &TemplateContext) -> String {
        state
            .status
            .extensions
            .node_allocation_request_ref
            .as_ref()
            .map(|r| r.hardware_plugin_ref.clone())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| context.hardware_template.spec.hardware_plugin_ref.clone())
    }

    pub(crate) async fn handle_hardware_template_rendering(
        &self,
        state: &mut RequestState,
    ) -> Result<Requeue, ControllerError> {
        let context = self.load_context(&state.request).await?;
        let rendered = render_node_allocation_request(&context, state.generation());

        if let Some(id) = state.status.node_allocation_request_id().map(str::to_string) {
            let client = self.plugins.client_for(&Self::plugin_ref(state, &context)).await?;
            if let Some(existing) = client.get_node_allocation_request(&id).await? {
                let template_groups = &context.hardware_template.spec.node_group_data;
                for group in existing.node_groups() {
                    let name = &group.node_group_data.name;
                    if !template_groups.iter().any(|g| &g.name == name) {
                        return Err(ControllerError::Input(format!(
                            "node group {} found in NodeAllocationRequest but not in Hardware Template",
                            name
                        )));
                    }
                }

                if node_groups_differ(existing.node_groups(), &rendered.node_group)
                    && state.status.condition(ConditionType::HardwareProvisioned).is_some()
                {
                    info!(
                        "Node groups of NodeAllocationRequest {} changed for ProvisioningRequest {}, re-running hardware provisioning",
                        id,
                        state.name()
                    );
                    state.set(
                        ConditionType::HardwareProvisioned,
                        ConditionStatus::False,
                        ConditionReason::InProgress,
                        "Hardware configuration is in progress",
                    );
                }
            }
        }

        state.set(
            ConditionType::HardwareTemplateRendered,
            ConditionStatus::True,
            ConditionReason::Completed,
            "Rendered Hardware template successfully",
        );
        Ok(Requeue::Short)
    }

    pub(crate) async fn handle_hardware_provisioning(&self, state: &mut RequestState) -> Result<Requeue, ControllerError> {
        let context = self.load_context(&state.request).await?;
        let rendered = render_node_allocation_request(&context, state.generation());
        let plugin_ref = Self::plugin_ref(state, &context);
        let client = self.plugins.client_for(&plugin_ref).await?;

        let Some(id) = state.status.node_allocation_request_id().map(str::to_string) else {
            let id = client.create_node_allocation_request(&rendered).await?;
            info!(
                "Created NodeAllocationRequest {} on plugin {} for ProvisioningRequest {}",
                id,
                plugin_ref,
                state.name()
            );
            state.status.extensions.node_allocation_request_ref = Some(NodeAllocationRequestRef {
                node_allocation_request_id: id.clone(),
                hardware_plugin_ref: plugin_ref,
                hardware_provisioning_check_start: Some(Utc::now()),
                hardware_configuring_check_start: None,
            });
            state.set(
                ConditionType::HardwareProvisioned,
                ConditionStatus::Unknown,
                ConditionReason::InProgress,
                format!("Waiting for NodeAllocationRequest ({}) to be processed", id),
            );
            return Ok(Requeue::Medium);
        };

        let response = client.get_node_allocation_request(&id).await?.ok_or_else(|| {
            ControllerError::Reconciliation(format!(
                "NodeAllocationRequest {} not found on plugin {}",
                id, plugin_ref
            ))
        })?;

        if node_groups_differ(response.node_groups(), &rendered.node_group) {
            client.update_node_allocation_request(&id, &rendered).await?;
            info!(
                "Updated node groups of NodeAllocationRequest {} for ProvisioningRequest {}",
                id,
                state.name()
            );
            if let Some(reference) = state.status.extensions.node_allocation_request_ref.as_mut() {
                reference.hardware_configuring_check_start = Some(Utc::now());
            }
            state.set(
                ConditionType::HardwareProvisioned,
                ConditionStatus::False,
                ConditionReason::InProgress,
                "Hardware configuration is in progress",
            );
            return Ok(Requeue::Medium);
        }

        Ok(self.evaluate_hardware_status(state, &context, &id, &response))
    }

    fn evaluate_hardware_status(
        &self,
        state: &mut RequestState,
        context: &TemplateContext,
        id: &str,
        response: &NodeAllocationRequestResponse,
    ) -> Requeue {
        let transaction_id = response
            .node_allocation_request
            .as_ref()
            .map_or(state.generation(), |r| r.config_transaction_id);
        let action = determine_action(response.conditions(), transaction_id, response.observed_config_transaction_id());
        debug!("NodeAllocationRequest {} action: {:?}", id, action);

        let Some(provisioned) = response.condition(CONDITION_PROVISIONED) else {
            state.set(
                ConditionType::HardwareProvisioned,
                ConditionStatus::Unknown,
                ConditionReason::InProgress,
                format!("Waiting for NodeAllocationRequest ({}) to be processed", id),
            );
            return Requeue::Medium;
        };

        if action == NodeAllocationRequestAction::Noop && provisioned.is_true() {
            let message = if provisioned.message.is_empty() {
                "Hardware provisioning completed".to_string()
            } else {
                provisioned.message.clone()
            };
            if let Some(reference) = state.status.extensions.node_allocation_request_ref.as_mut() {
                reference.hardware_configuring_check_start = None;
            }
            info!("Hardware for ProvisioningRequest {} is provisioned", state.name());
            state.set(ConditionType::HardwareProvisioned, ConditionStatus::True, ConditionReason::Completed, message);
            return Requeue::Short;
        }

        if provisioned.reason == REASON_FAILED {
            let message = if provisioned.message.is_empty() {
                "Hardware provisioning failed".to_string()
            } else {
                provisioned.message.clone()
            };
            warn!("NodeAllocationRequest {} failed: {}", id, message);
            state.set(ConditionType::HardwareProvisioned, ConditionStatus::False, ConditionReason::Failed, message);
            return Requeue::Done;
        }

        let now = Utc::now();
        let Some(reference) = state.status.extensions.node_allocation_request_ref.as_mut() else {
            return Requeue::Medium;
        };
        let configuring = reference.hardware_configuring_check_start.is_some();
        let start = match reference.hardware_configuring_check_start.or(reference.hardware_provisioning_check_start) {
            Some(start) => start,
            None => *reference.hardware_provisioning_check_start.insert(now),
        };

        if timeout_exceeded(start, context.timeouts.hardware_provisioning, now) {
            let message = if configuring {
                "Hardware configuration timed out"
            } else {
                "Hardware provisioning timed out"
            };
            warn!("NodeAllocationRequest {} for ProvisioningRequest {}: {}", id, state.name(), message);
            state.set(ConditionType::HardwareProvisioned, ConditionStatus::False, ConditionReason::TimedOut, message);
            return Requeue::Done;
        }

        state.set(
            ConditionType::HardwareProvisioned,
            ConditionStatus::False,
            ConditionReason::InProgress,
            "Hardware provisioning is in progress",
        );
        Requeue::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::timeouts::Timeouts;
    use crate::test_utils::create_test_hardware_template;
    use serde_json::json;

    fn context() -> TemplateContext {
        TemplateContext {
            template_id: "sno-ran-du.v4-Y-Z-1".to_string(),
            template_namespace: "sno-ran-du-v4-Y-Z-1".to_string(),
            site_id: "local-west-12345".to_string(),
            cluster_name: "site-sno-du-1".to_string(),
            cluster_instance_input: json!({
                "clusterName": "site-sno-du-1",
                "nodes": [
                    {"hostName": "node1", "role": "master"},
                    {"hostName": "node2", "role": "master"},
                    {"hostName": "node3", "role": "worker"}
                ]
            }),
            policy_template_input: json!({}),
            hardware_template: create_test_hardware_template("placeholder-du-template-v1"),
            timeouts: Timeouts::default(),
        }
    }

    #[test]
    fn test_render_sizes_groups_by_role() {
        let rendered = render_node_allocation_request(&context(), 4);
        assert_eq!(rendered.cluster_id, "site-sno-du-1");
        assert_eq!(rendered.site, "local-west-12345");
        assert_eq!(rendered.config_transaction_id, 4);
        let sizes: Vec<(String, u32)> = rendered
            .node_group
            .iter()
            .map(|g| (g.node_group_data.name.clone(), g.size))
            .collect();
        assert_eq!(sizes, vec![("controller".to_string(), 2), ("worker".to_string(), 1)]);
    }

    #[test]
    fn test_node_groups_differ_ignores_node_names() {
        let desired = render_node_allocation_request(&context(), 1).node_group;
        let mut current = desired.clone();
        current[0].node_names = vec!["node-a".to_string(), "node-b".to_string()];
        assert!(!node_groups_differ(&current, &desired));

        current[1].size = 2;
        assert!(node_groups_differ(&current, &desired), "a size change must be detected");
    }

    #[test]
    fn test_role_to_group_first_wins() {
        let roles = role_to_group(&context());
        assert_eq!(roles.get("master").map(String::as_str), Some("controller"));
        assert_eq!(roles.get("worker").map(String::as_str), Some("worker"));
    }
}
