//! ClusterInstance phases
//!
//! ClusterInstanceRendered, ClusterResourcesCreated, ClusterInstanceProcessed
//! and ClusterProvisioned. The ClusterInstance is re-rendered from the request,
//! the template defaults and the allocated nodes whenever it is needed.

use std::collections::BTreeMap;

use chrono::Utc;
use crds::{
    find_condition, ClusterDetails, ConditionReason, ConditionStatus, ConditionType, ProvisionedResources,
};
use hwplugin_client::AllocatedNode;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use template_engine::{
    apply_node_configuration, build_cluster_instance, find_immutable_field_updates, remove_interface_labels,
    validate_required_fields, HardwareInterface, HardwareNode,
};
use tracing::{debug, info, warn};

use super::context::TemplateContext;
use super::hardware::role_to_group;
use super::timeouts::timeout_exceeded;
use super::{Reconciler, RequestState, Requeue, PROVISIONING_REQUEST_NAME_LABEL};
use crate::clusters::object_conditions;
use crate::error::ControllerError;

/// ClusterInstance conditions that must all be True once it has been processed
pub const CLUSTER_INSTANCE_PROCESSING_CONDITIONS: [&str; 4] = [
    "ClusterInstanceValidated",
    "RenderedTemplates",
    "RenderedTemplatesValidated",
    "RenderedTemplatesApplied",
];

/// ClusterInstance condition tracking the installation
pub const CLUSTER_INSTANCE_PROVISIONED: &str = "Provisioned";

/// ManagedCluster label the templated policies select on
pub const CLUSTER_VERSION_LABEL: &str = "cluster-version";

const DOCKER_CONFIG_JSON_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// ManagedCluster label and cluster claim carrying the cluster ID
const MANAGED_CLUSTER_ID_LABEL: &str = "clusterID";
const MANAGED_CLUSTER_ID_CLAIM: &str = "id.openshift.io";

/// A rendered ClusterInstance and the nodes it was rendered from
#[derive(Debug, Clone)]
pub(crate) struct RenderedClusterInstance {
    pub document: Value,
    pub nodes: Vec<AllocatedNode>,
    /// Allocated node id to host name
    pub host_map: BTreeMap<String, String>,
}

/// Group allocated nodes by node-group name, ordered by node id
pub fn hardware_nodes_by_group(nodes: &[AllocatedNode]) -> BTreeMap<String, Vec<HardwareNode>> {
    let mut sorted: Vec<&AllocatedNode> = nodes.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut groups: BTreeMap<String, Vec<HardwareNode>> = BTreeMap::new();
    for node in sorted {
        groups.entry(node.group_name.clone()).or_default().push(HardwareNode {
            node_id: node.id.clone(),
            host_namespace: None,
            bmc_address: node.bmc.address.clone(),
            bmc_credentials_name: node.bmc.credentials_name.clone(),
            interfaces: node
                .interfaces
                .iter()
                .map(|i| HardwareInterface {
                    name: i.name.clone(),
                    label: i.label.clone(),
                    mac_address: i.mac_address.clone(),
                })
                .collect(),
        });
    }
    groups
}

/// Cluster ID reported by a ManagedCluster, from its label or its cluster claim
pub fn managed_cluster_id(managed_cluster: &Value) -> Option<String> {
    let from_label = managed_cluster
        .pointer("/metadata/labels")
        .and_then(|labels| labels.get(MANAGED_CLUSTER_ID_LABEL))
        .and_then(Value::as_str);
    let from_claim = || {
        managed_cluster
            .pointer("/status/clusterClaims")
            .and_then(Value::as_array)?
            .iter()
            .find(|claim| claim.get("name").and_then(Value::as_str) == Some(MANAGED_CLUSTER_ID_CLAIM))?
            .get("value")
            .and_then(Value::as_str)
    };
    from_label
        .or_else(from_claim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

pub fn policy_template_config_map_name(cluster_name: &str) -> String {
    format!("{}-pg", cluster_name)
}

/// Namespace of the templated policies of a ClusterTemplate namespace
pub fn policy_template_namespace(template_namespace: &str) -> String {
    format!("ztp-{}", template_namespace)
}

/// String values of the merged policy template parameters
pub fn policy_template_data(input: &Value) -> Result<BTreeMap<String, String>, ControllerError> {
    let Some(map) = input.as_object() else {
        return Ok(BTreeMap::new());
    };
    map.iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key.clone(), s.clone())),
            other => Err(ControllerError::Input(format!(
                "policyTemplateParameters/policyTemplateSchema for the {} key ({}) is not a string",
                key, other
            ))),
        })
        .collect()
}

/// The ManagedCluster labels of a ClusterInstance spec must carry [`CLUSTER_VERSION_LABEL`]
pub fn check_cluster_labels_for_policies(cluster_name: &str, spec: &Value) -> Result<(), ControllerError> {
    let labels = spec
        .pointer("/extraLabels/ManagedCluster")
        .and_then(Value::as_object)
        .filter(|labels| !labels.is_empty())
        .ok_or_else(|| {
            ControllerError::Input(format!(
                "No cluster labels configured by the ClusterInstance {}. Labels are needed for cluster configuration",
                cluster_name
            ))
        })?;
    if !labels.contains_key(CLUSTER_VERSION_LABEL) {
        return Err(ControllerError::Input(format!(
            "Managed cluster {} is missing the {} label. This label is needed for correctly generating and populating configuration data",
            cluster_name, CLUSTER_VERSION_LABEL
        )));
    }
    Ok(())
}

fn object_meta(name: &str, namespace: &str, labels: &BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels.clone()),
        ..Default::default()
    }
}

fn dry_run_error(error: ControllerError) -> ControllerError {
    match error {
        ControllerError::Kube(kube::Error::Api(response)) if response.code == 400 || response.code == 422 => {
            ControllerError::Input(format!(
                "failed to validate the rendered ClusterInstance with dry-run: {}",
                response.message
            ))
        }
        other => other,
    }
}

impl Reconciler {
    fn request_labels(state: &RequestState) -> BTreeMap<String, String> {
        BTreeMap::from([(PROVISIONING_REQUEST_NAME_LABEL.to_string(), state.name().to_string())])
    }

    /// Render the ClusterInstance from the merged input and the allocated nodes
    pub(crate) async fn render_cluster_instance(
        &self,
        state: &RequestState,
        context: &TemplateContext,
    ) -> Result<RenderedClusterInstance, ControllerError> {
        let reference = state
            .status
            .extensions
            .node_allocation_request_ref
            .as_ref()
            .filter(|r| !r.node_allocation_request_id.is_empty())
            .ok_or_else(|| {
                ControllerError::Reconciliation(format!(
                    "ProvisioningRequest {} has no NodeAllocationRequest",
                    state.name()
                ))
            })?;
        let plugin_ref = if reference.hardware_plugin_ref.is_empty() {
            context.hardware_template.spec.hardware_plugin_ref.as_str()
        } else {
            reference.hardware_plugin_ref.as_str()
        };
        let client = self.plugins.client_for(plugin_ref).await?;
        let nodes = client
            .get_allocated_nodes_from_node_allocation_request(&reference.node_allocation_request_id)
            .await?;
        debug!(
            "NodeAllocationRequest {} has {} allocated node(s)",
            reference.node_allocation_request_id,
            nodes.len()
        );

        let mut spec = context.cluster_instance_input.clone();
        let assignments = apply_node_configuration(
            &mut spec,
            &hardware_nodes_by_group(&nodes),
            &role_to_group(context),
            &context.hardware_template.spec.boot_interface_label,
            state.name(),
        )?;
        validate_required_fields(&spec)?;
        remove_interface_labels(&mut spec);

        let document = build_cluster_instance(spec, &context.cluster_name, &Self::request_labels(state));
        let host_map = assignments.into_iter().map(|a| (a.node_id, a.host_name)).collect();
        Ok(RenderedClusterInstance {
            document,
            nodes,
            host_map,
        })
    }

    pub(crate) async fn handle_cluster_instance_rendering(
        &self,
        state: &mut RequestState,
    ) -> Result<Requeue, ControllerError> {
        let context = self.load_context(&state.request).await?;
        let rendered = self.render_cluster_instance(state, &context).await?;
        let new_spec = rendered.document.get("spec").cloned().unwrap_or(Value::Null);

        if let Some(existing) = self
            .clusters
            .get_cluster_instance(&context.cluster_name, &context.cluster_name)
            .await?
        {
            let old_spec = existing.get("spec").cloned().unwrap_or(Value::Null);
            let (immutable, scaling) = find_immutable_field_updates(&old_spec, &new_spec);
            if !immutable.is_empty() {
                return Err(ControllerError::Input(format!(
                    "detected changes in immutable fields: {}",
                    immutable.join(", ")
                )));
            }
            if !scaling.is_empty() && !state.status.is_condition_true(ConditionType::ClusterProvisioned) {
                return Err(ControllerError::Input(format!(
                    "detected node scaling changes before the cluster installation completed: {}",
                    scaling.join(", ")
                )));
            }
            if old_spec != new_spec {
                info!(
                    "Rendered ClusterInstance {} differs from the applied one, re-applying",
                    context.cluster_name
                );
                for condition_type in [ConditionType::ClusterResourcesCreated, ConditionType::ClusterInstanceProcessed] {
                    if state.status.condition(condition_type).is_some() {
                        state.set(
                            condition_type,
                            ConditionStatus::Unknown,
                            ConditionReason::InProgress,
                            "Re-evaluating after a spec change",
                        );
                    }
                }
            }
        }

        self.clusters
            .apply_cluster_instance(&rendered.document, true)
            .await
            .map_err(dry_run_error)?;

        state.status.extensions.allocated_node_host_map = rendered.host_map;
        state.set(
            ConditionType::ClusterInstanceRendered,
            ConditionStatus::True,
            ConditionReason::Completed,
            "ClusterInstance rendered and passed dry-run validation",
        );
        Ok(Requeue::Short)
    }

    /// Resources the ClusterInstance installs from
    ///
    /// The cluster namespace with copies of the BMC credential secrets, the
    /// pull secret and the extra-manifests ConfigMaps, plus the ConfigMap read
    /// by the templated policies.
    pub(crate) async fn handle_cluster_resources(&self, state: &mut RequestState) -> Result<Requeue, ControllerError> {
        let context = self.load_context(&state.request).await?;
        let rendered = self.render_cluster_instance(state, &context).await?;
        let namespace = context.cluster_name.as_str();
        let labels = Self::request_labels(state);
        let spec = rendered.document.get("spec").cloned().unwrap_or(Value::Null);

        self.store.ensure_namespace(namespace, &labels).await?;
        self.copy_bmc_secrets(&rendered.nodes, namespace, &labels).await?;
        self.copy_pull_secret(&context, &spec, &labels).await?;
        self.copy_extra_manifests(&context, &spec, &labels).await?;

        check_cluster_labels_for_policies(namespace, &spec)?;
        self.apply_policy_template_config_map(&context).await?;

        state.set(
            ConditionType::ClusterResourcesCreated,
            ConditionStatus::True,
            ConditionReason::Completed,
            "Cluster resources applied",
        );
        Ok(Requeue::Short)
    }

    async fn copy_bmc_secrets(
        &self,
        nodes: &[AllocatedNode],
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        for node in nodes {
            let secret_name = node.bmc.credentials_name.as_str();
            if secret_name.is_empty() {
                return Err(ControllerError::Input(format!(
                    "allocated node {} has no BMC credentials secret",
                    node.id
                )));
            }
            if self.store.get_secret(namespace, secret_name).await?.is_some() {
                debug!("BMC secret {}/{} already exists", namespace, secret_name);
                continue;
            }
            let source = self
                .store
                .get_secret(&self.config.hwplugin_namespace, secret_name)
                .await?
                .ok_or_else(|| {
                    ControllerError::Reconciliation(format!(
                        "BMC secret {}/{} not found",
                        self.config.hwplugin_namespace, secret_name
                    ))
                })?;
            let copy = Secret {
                metadata: object_meta(secret_name, namespace, labels),
                data: source.data.clone(),
                type_: source.type_.clone(),
                ..Default::default()
            };
            self.store.create_secret(&copy).await?;
            info!("Copied BMC secret {} into namespace {}", secret_name, namespace);
        }
        Ok(())
    }

    /// Copy `spec.pullSecretRef` from the ClusterTemplate namespace
    async fn copy_pull_secret(
        &self,
        context: &TemplateContext,
        spec: &Value,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        let name = spec
            .pointer("/pullSecretRef/name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ControllerError::Input("spec.pullSecretRef.name must be provided".to_string()))?;
        let source = self
            .store
            .get_secret(&context.template_namespace, name)
            .await?
            .ok_or_else(|| {
                ControllerError::Input(format!(
                    "pull secret {} expected to exist in the {} namespace, but it is missing",
                    name, context.template_namespace
                ))
            })?;
        let copy = Secret {
            metadata: object_meta(name, &context.cluster_name, labels),
            data: source.data,
            type_: Some(DOCKER_CONFIG_JSON_SECRET_TYPE.to_string()),
            ..Default::default()
        };
        self.store.create_secret(&copy).await
    }

    /// Copy every ConfigMap of `spec.extraManifestsRefs` from the ClusterTemplate namespace
    async fn copy_extra_manifests(
        &self,
        context: &TemplateContext,
        spec: &Value,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        let refs = spec
            .get("extraManifestsRefs")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for name in refs.iter().filter_map(|r| r.get("name").and_then(Value::as_str)) {
            let source = self
                .store
                .get_config_map(&context.template_namespace, name)
                .await?
                .ok_or_else(|| {
                    ControllerError::Input(format!(
                        "extra-manifests configmap {} expected to exist in the {} namespace, but it is missing",
                        name, context.template_namespace
                    ))
                })?;
            let copy = ConfigMap {
                metadata: object_meta(name, &context.cluster_name, labels),
                data: source.data,
                ..Default::default()
            };
            self.store.apply_config_map(&copy).await?;
        }
        Ok(())
    }

    /// ConfigMap `<cluster>-pg` in `ztp-<template namespace>` holding the policy template values
    async fn apply_policy_template_config_map(&self, context: &TemplateContext) -> Result<(), ControllerError> {
        let data = policy_template_data(&context.policy_template_input)?;
        if data.is_empty() {
            info!("Policy template data of cluster {} is empty", context.cluster_name);
            return Ok(());
        }
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(policy_template_config_map_name(&context.cluster_name)),
                namespace: Some(policy_template_namespace(&context.template_namespace)),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };
        self.store.apply_config_map(&config_map).await
    }

    pub(crate) async fn handle_cluster_instance_processing(
        &self,
        state: &mut RequestState,
    ) -> Result<Requeue, ControllerError> {
        let context = self.load_context(&state.request).await?;
        let rendered = self.render_cluster_instance(state, &context).await?;
        self.clusters.apply_cluster_instance(&rendered.document, false).await?;

        let details = state
            .status
            .extensions
            .cluster_details
            .get_or_insert_with(ClusterDetails::default);
        details.name = context.cluster_name.clone();

        let name = context.cluster_name.as_str();
        let conditions = match self.clusters.get_cluster_instance(name, name).await? {
            Some(instance) => object_conditions(&instance),
            None => Vec::new(),
        };

        let mut waiting = false;
        for condition_type in CLUSTER_INSTANCE_PROCESSING_CONDITIONS {
            match find_condition(&conditions, condition_type) {
                None => waiting = true,
                Some(c) if c.status == ConditionStatus::Unknown => waiting = true,
                Some(c) if c.status == ConditionStatus::False => {
                    warn!("ClusterInstance {} condition {} is False: {}", name, condition_type, c.message);
                    state.set(
                        ConditionType::ClusterInstanceProcessed,
                        ConditionStatus::False,
                        ConditionReason::Failed,
                        c.message.clone(),
                    );
                    return Ok(Requeue::Done);
                }
                Some(_) => {}
            }
        }

        if waiting {
            state.set(
                ConditionType::ClusterInstanceProcessed,
                ConditionStatus::Unknown,
                ConditionReason::InProgress,
                format!("Waiting for ClusterInstance ({}) to be processed", name),
            );
            return Ok(Requeue::Medium);
        }

        state.set(
            ConditionType::ClusterInstanceProcessed,
            ConditionStatus::True,
            ConditionReason::Completed,
            format!("Applied and processed ClusterInstance ({}) successfully", name),
        );
        Ok(Requeue::Short)
    }

    pub(crate) async fn handle_cluster_provisioning(&self, state: &mut RequestState) -> Result<Requeue, ControllerError> {
        let context = self.load_context(&state.request).await?;
        let name = context.cluster_name.as_str();
        let conditions = match self.clusters.get_cluster_instance(name, name).await? {
            Some(instance) => object_conditions(&instance),
            None => {
                return Err(ControllerError::Reconciliation(format!(
                    "ClusterInstance {} not found",
                    name
                )));
            }
        };

        let Some(provisioned) = find_condition(&conditions, CLUSTER_INSTANCE_PROVISIONED) else {
            state.set(
                ConditionType::ClusterProvisioned,
                ConditionStatus::Unknown,
                ConditionReason::Unknown,
                "Waiting for cluster installation to start",
            );
            return Ok(Requeue::Medium);
        };

        if provisioned.is_true() {
            if let Some(id) = self.clusters.get_managed_cluster(name).await?.as_ref().and_then(managed_cluster_id) {
                state
                    .status
                    .provisioning_status
                    .provisioned_resources
                    .get_or_insert_with(ProvisionedResources::default)
                    .o_cloud_cluster_id = Some(id);
            }
            info!("Cluster {} of ProvisioningRequest {} is installed", name, state.name());
            state.set(
                ConditionType::ClusterProvisioned,
                ConditionStatus::True,
                ConditionReason::Completed,
                "Provisioning completed",
            );
            return Ok(Requeue::Short);
        }

        if provisioned.reason == ConditionReason::Failed.as_str() {
            warn!("Installation of cluster {} failed: {}", name, provisioned.message);
            state.set(
                ConditionType::ClusterProvisioned,
                ConditionStatus::False,
                ConditionReason::Failed,
                "Cluster installation failed",
            );
            return Ok(Requeue::Done);
        }

        let now = Utc::now();
        let details = state
            .status
            .extensions
            .cluster_details
            .get_or_insert_with(ClusterDetails::default);
        if details.name.is_empty() {
            details.name = name.to_string();
        }
        let start = *details.cluster_provision_started_at.get_or_insert(now);

        if timeout_exceeded(start, context.timeouts.cluster_installation, now) {
            warn!("Installation of cluster {} timed out", name);
            state.set(
                ConditionType::ClusterProvisioned,
                ConditionStatus::False,
                ConditionReason::TimedOut,
                "Cluster installation timed out",
            );
            return Ok(Requeue::Done);
        }

        state.set(
            ConditionType::ClusterProvisioned,
            ConditionStatus::False,
            ConditionReason::InProgress,
            "Cluster installation is in progress",
        );
        Ok(Requeue::Medium)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwplugin_client::{Bmc, Interface};
    use serde_json::json;

    fn node(id: &str, group: &str) -> AllocatedNode {
        AllocatedNode {
            id: id.to_string(),
            group_name: group.to_string(),
            bmc: Bmc {
                address: format!("idrac-virtualmedia+https://{}.example.com", id),
                credentials_name: format!("{}-bmc-secret", id),
            },
            interfaces: vec![Interface {
                name: "eno1".to_string(),
                mac_address: "00:00:00:01:20:30".to_string(),
                label: "bootable-interface".to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_hardware_nodes_grouped_and_sorted() {
        let groups = hardware_nodes_by_group(&[node("node-b", "controller"), node("node-a", "controller"), node("node-c", "worker")]);
        let controller: Vec<&str> = groups["controller"].iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(controller, vec!["node-a", "node-b"]);
        assert_eq!(groups["worker"][0].bmc_credentials_name, "node-c-bmc-secret");
        assert_eq!(groups["worker"][0].interfaces[0].label, "bootable-interface");
    }

    #[test]
    fn test_managed_cluster_id_prefers_label() {
        let labelled = json!({"metadata": {"labels": {"clusterID": "76b8cbad"}}});
        assert_eq!(managed_cluster_id(&labelled).as_deref(), Some("76b8cbad"));

        let claimed = json!({
            "metadata": {"labels": {}},
            "status": {"clusterClaims": [{"name": "id.openshift.io", "value": "f7a1e2"}]}
        });
        assert_eq!(managed_cluster_id(&claimed).as_deref(), Some("f7a1e2"));
        assert_eq!(managed_cluster_id(&json!({"metadata": {}})), None);
    }

    #[test]
    fn test_policy_template_data_requires_strings() {
        let data = policy_template_data(&json!({"cpu-isolated": "2-31", "sriov-network-vlan-1": "140"})).unwrap();
        assert_eq!(data["sriov-network-vlan-1"], "140");
        assert!(policy_template_data(&Value::Null).unwrap().is_empty());

        let err = policy_template_data(&json!({"sriov-network-vlan-1": 140})).unwrap_err();
        assert!(err.is_input_error());
        assert_eq!(
            err.to_string(),
            "policyTemplateParameters/policyTemplateSchema for the sriov-network-vlan-1 key (140) is not a string"
        );
    }

    #[test]
    fn test_cluster_labels_for_policies() {
        let spec = json!({"extraLabels": {"ManagedCluster": {"cluster-version": "v4-16"}}});
        assert!(check_cluster_labels_for_policies("site-1", &spec).is_ok());

        let err = check_cluster_labels_for_policies("site-1", &json!({})).unwrap_err();
        assert!(err.to_string().starts_with("No cluster labels configured by the ClusterInstance site-1"));

        let spec = json!({"extraLabels": {"ManagedCluster": {"sno-ran-du-policy": "v1"}}});
        let err = check_cluster_labels_for_policies("site-1", &spec).unwrap_err();
        assert!(
            err.to_string().starts_with("Managed cluster site-1 is missing the cluster-version label"),
            "unexpected message: {}",
            err
        );
    }

    #[test]
    fn test_policy_template_config_map_location() {
        assert_eq!(policy_template_config_map_name("site-sno-du-1"), "site-sno-du-1-pg");
        assert_eq!(policy_template_namespace("sno-ran-du-v4-Y-Z-1"), "ztp-sno-ran-du-v4-Y-Z-1");
    }
}
