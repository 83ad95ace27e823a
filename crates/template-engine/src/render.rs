//! Rendering of the ClusterInstance document
//!
//! The request's `clusterInstanceParameters` are validated, merged with the
//! template defaults, enriched with the hardware assigned to each node and
//! finally wrapped into a ClusterInstance resource.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::TemplateError;
use crate::merge::{merge_with_defaults, override_labels_or_annotations};
use crate::schema::{
    disallow_unknown_fields, extract_matching_input, extract_sub_schema, validate, CLUSTER_INSTANCE_PARAMETERS,
    POLICY_TEMPLATE_PARAMETERS,
};

/// API version of the rendered ClusterInstance
pub const CLUSTER_INSTANCE_API_VERSION: &str = "siteconfig.open-cluster-management.io/v1alpha1";
/// Kind of the rendered ClusterInstance
pub const CLUSTER_INSTANCE_KIND: &str = "ClusterInstance";

/// Network interface reported by the hardware layer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HardwareInterface {
    pub name: String,
    pub label: String,
    pub mac_address: String,
}

/// Hardware assigned to one cluster node
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HardwareNode {
    /// Allocated node id at the hardware plugin
    pub node_id: String,
    /// Namespace holding the node's host resources, if the plugin exposes one
    pub host_namespace: Option<String>,
    pub bmc_address: String,
    /// Secret holding the BMC credentials; a name is generated when empty
    pub bmc_credentials_name: String,
    pub interfaces: Vec<HardwareInterface>,
}

/// A hardware node matched to a cluster node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAssignment {
    pub node_id: String,
    pub host_name: String,
    pub bmc_credentials_name: String,
}

/// Validate and merge `clusterInstanceParameters` with the template defaults
///
/// The raw input is validated in strict mode against its sub-schema. Labels
/// and annotations from the defaults then take precedence over the same keys
/// in the input before the two documents are merged.
pub fn prepare_cluster_instance_input(
    template_schema: &Value,
    params: &Value,
    defaults: Option<&Value>,
    template_id: &str,
) -> Result<Value, TemplateError> {
    let mut sub_schema = extract_sub_schema(template_schema, CLUSTER_INSTANCE_PARAMETERS)?;
    disallow_unknown_fields(&mut sub_schema);

    let mut input = extract_matching_input(params, CLUSTER_INSTANCE_PARAMETERS)?;
    validate(&sub_schema, &input).map_err(|e| {
        TemplateError::InvalidInput(format!(
            "the provided {} does not match the schema from ClusterTemplate ({}): {}",
            CLUSTER_INSTANCE_PARAMETERS, template_id, e
        ))
    })?;

    if let Some(defaults) = defaults {
        override_labels_or_annotations(&mut input, defaults)
            .map_err(|e| TemplateError::TypeMismatch(format!("failed to override labels or annotations: {}", e)))?;
    }

    let merged = merge_with_defaults(Some(&input), defaults).map_err(|e| {
        TemplateError::InvalidDocument(format!("failed to merge data for {}: {}", CLUSTER_INSTANCE_PARAMETERS, e))
    })?;
    validate_default_interfaces(&merged)?;

    debug!("Prepared {} for ClusterTemplate {}", CLUSTER_INSTANCE_PARAMETERS, template_id);
    Ok(merged)
}

/// Merge `policyTemplateParameters` with the template defaults and validate the result
pub fn prepare_policy_template_input(
    template_schema: &Value,
    params: &Value,
    defaults: Option<&Value>,
    template_id: &str,
) -> Result<Value, TemplateError> {
    let sub_schema = extract_sub_schema(template_schema, POLICY_TEMPLATE_PARAMETERS)?;
    let input = params.get(POLICY_TEMPLATE_PARAMETERS);

    let merged = match merge_with_defaults(input, defaults) {
        Ok(merged) => merged,
        // No policy parameters anywhere is a valid, empty configuration
        Err(TemplateError::InvalidDocument(_)) => Value::Object(Map::new()),
        Err(e) => {
            return Err(TemplateError::InvalidDocument(format!(
                "failed to merge data for {}: {}",
                POLICY_TEMPLATE_PARAMETERS, e
            )));
        }
    };

    validate(&sub_schema, &merged).map_err(|e| {
        TemplateError::InvalidInput(format!(
            "the provided {} does not match the schema from ClusterTemplate ({}): {}",
            POLICY_TEMPLATE_PARAMETERS, template_id, e
        ))
    })?;
    Ok(merged)
}

/// Check that a value is present and, for strings, arrays and maps, not empty
pub fn validate_non_empty(path: &str, value: Option<&Value>) -> Result<(), TemplateError> {
    let empty = match value {
        None | Some(Value::Null) => {
            return Err(TemplateError::MissingField(format!("{} must be provided", path)));
        }
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    };
    if empty {
        return Err(TemplateError::MissingField(format!("{} cannot be empty", path)));
    }
    Ok(())
}

/// Check that a present value is a map
pub fn validate_map_type(path: &str, value: Option<&Value>) -> Result<(), TemplateError> {
    match value {
        Some(v) if !v.is_object() => Err(TemplateError::MissingField(format!("{} must be of type map", path))),
        _ => Ok(()),
    }
}

/// Check that a present value is an array
pub fn validate_array_type(path: &str, value: Option<&Value>) -> Result<(), TemplateError> {
    match value {
        Some(v) if !v.is_array() => Err(TemplateError::MissingField(format!("{} must be of type array", path))),
        _ => Ok(()),
    }
}

fn require(path: &str, value: Option<&Value>) -> Result<(), TemplateError> {
    validate_non_empty(path, value)
}

fn require_map(path: &str, value: Option<&Value>) -> Result<(), TemplateError> {
    validate_non_empty(path, value)?;
    validate_map_type(path, value)
}

fn require_array(path: &str, value: Option<&Value>) -> Result<(), TemplateError> {
    validate_non_empty(path, value)?;
    validate_array_type(path, value)
}

/// Check the fields a ClusterInstance cannot be created without
///
/// `spec` is the fully rendered spec, after node configuration.
pub fn validate_required_fields(spec: &Value) -> Result<(), TemplateError> {
    require("spec.clusterName", spec.get("clusterName"))?;
    require("spec.baseDomain", spec.get("baseDomain"))?;
    require_map("spec.pullSecretRef", spec.get("pullSecretRef"))?;
    require_array("spec.templateRefs", spec.get("templateRefs"))?;
    require_array("spec.nodes", spec.get("nodes"))?;

    let nodes = spec.get("nodes").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    for (i, node) in nodes.iter().enumerate() {
        let prefix = format!("spec.nodes[{}]", i);
        require(&format!("{}.hostName", prefix), node.get("hostName"))?;
        require(&format!("{}.role", prefix), node.get("role"))?;
        require_array(&format!("{}.templateRefs", prefix), node.get("templateRefs"))?;
        require(&format!("{}.bmcAddress", prefix), node.get("bmcAddress"))?;
        require_map(&format!("{}.bmcCredentialsName", prefix), node.get("bmcCredentialsName"))?;
        require(&format!("{}.bootMACAddress", prefix), node.get("bootMACAddress"))?;

        let network = node.get("nodeNetwork");
        require_map(&format!("{}.nodeNetwork", prefix), network)?;
        require_array(
            &format!("{}.nodeNetwork.interfaces", prefix),
            network.and_then(|n| n.get("interfaces")),
        )?;
    }
    Ok(())
}

fn interfaces(node: &Value) -> &[Value] {
    node.pointer("/nodeNetwork/interfaces")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn interface_name(interface: &Value) -> String {
    interface
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string()
}

/// Check that every node interface carries a non-empty `label`
///
/// Labels tie template interfaces to hardware interfaces; they are not part
/// of the ClusterInstance itself.
pub fn validate_default_interfaces(data: &Value) -> Result<(), TemplateError> {
    let Some(nodes) = data.get("nodes").and_then(Value::as_array) else {
        return Ok(());
    };
    for node in nodes {
        for interface in interfaces(node) {
            match interface.get("label") {
                None => {
                    return Err(TemplateError::Interface(format!(
                        "'label' is missing for interface: {}",
                        interface_name(interface)
                    )));
                }
                Some(Value::String(label)) if label.is_empty() => {
                    return Err(TemplateError::Interface(format!(
                        "'label' is empty for interface: {}",
                        interface_name(interface)
                    )));
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

/// Drop the `label` of every node interface
pub fn remove_interface_labels(data: &mut Value) {
    let Some(nodes) = data.get_mut("nodes").and_then(Value::as_array_mut) else {
        return;
    };
    for node in nodes {
        if let Some(interfaces) = node.pointer_mut("/nodeNetwork/interfaces").and_then(Value::as_array_mut) {
            for interface in interfaces.iter_mut().filter_map(Value::as_object_mut) {
                interface.remove("label");
            }
        }
    }
}

/// Set `macAddress` on each node interface from the hardware interface with the same label
pub fn assign_mac_addresses(node: &mut Value, hw_interfaces: &[HardwareInterface]) -> Result<(), TemplateError> {
    let host_name = node.get("hostName").and_then(Value::as_str).unwrap_or_default().to_string();
    let Some(interfaces) = node.pointer_mut("/nodeNetwork/interfaces").and_then(Value::as_array_mut) else {
        return Err(TemplateError::InvalidDocument(format!(
            "nodeNetwork.interfaces not found for node {}",
            host_name
        )));
    };

    for interface in interfaces.iter_mut() {
        let (Some(name), Some(label)) = (
            interface.get("name").and_then(Value::as_str).map(str::to_string),
            interface.get("label").and_then(Value::as_str).map(str::to_string),
        ) else {
            return Err(TemplateError::Interface(
                "interface map from the cluster input is missing 'label' or 'name' key".to_string(),
            ));
        };

        let mac = hw_interfaces
            .iter()
            .find(|hw| hw.label == label && !hw.mac_address.is_empty())
            .map(|hw| hw.mac_address.clone())
            .ok_or_else(|| {
                TemplateError::Interface(format!(
                    "mac address not assigned for interface {}, node name {}",
                    name, host_name
                ))
            })?;

        if let Some(map) = interface.as_object_mut() {
            map.insert("macAddress".to_string(), Value::String(mac));
        }
    }
    Ok(())
}

/// MAC address of the interface carrying the boot label
pub fn boot_mac_address(hw_interfaces: &[HardwareInterface], boot_interface_label: &str) -> Result<String, TemplateError> {
    let interface = hw_interfaces
        .iter()
        .find(|hw| hw.label == boot_interface_label)
        .ok_or_else(|| {
            TemplateError::Interface(format!(
                "no boot interface found; missing interface with label \"{}\"",
                boot_interface_label
            ))
        })?;
    if interface.mac_address.is_empty() {
        return Err(TemplateError::MissingField(format!(
            "bootMACAddress must be provided; boot interface {} has no MAC address",
            interface.name
        )));
    }
    Ok(interface.mac_address.clone())
}

/// Name of the BMC credentials secret derived from a node's host name
///
/// `node1.example.com` becomes `node1-bmc-secret`.
pub fn generate_bmc_secret_name(node: &Value, request_name: &str) -> Result<String, TemplateError> {
    let host_name = node.get("hostName").and_then(Value::as_str).ok_or_else(|| {
        TemplateError::MissingField(format!(
            "\"hostname\" key expected to exist in spec.templateParameters.clusterInstanceParameters of ProvisioningRequest {}, but it's missing",
            request_name
        ))
    })?;
    let lower = host_name.to_lowercase();
    let short = lower.split('.').next().unwrap_or_default();
    Ok(format!("{}-bmc-secret", short))
}

/// Copy allocated hardware details onto the cluster nodes
///
/// Cluster nodes are matched to hardware by role through `role_to_group`;
/// within a group, hardware nodes are consumed in order. Returns one
/// assignment per matched cluster node.
pub fn apply_node_configuration(
    cluster_input: &mut Value,
    hw_nodes: &BTreeMap<String, Vec<HardwareNode>>,
    role_to_group: &BTreeMap<String, String>,
    boot_interface_label: &str,
    request_name: &str,
) -> Result<Vec<NodeAssignment>, TemplateError> {
    let nodes = cluster_input
        .get_mut("nodes")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| TemplateError::InvalidDocument("spec.nodes not found in cluster instance".to_string()))?;

    let mut consumed: BTreeMap<&str, usize> = BTreeMap::new();
    let mut assignments = Vec::new();
    let mut unmatched = Vec::new();

    for (i, node) in nodes.iter_mut().enumerate() {
        if !node.is_object() {
            return Err(TemplateError::InvalidDocument(format!("node at index {} is not a valid map", i)));
        }
        let role = node.get("role").and_then(Value::as_str).unwrap_or_default().to_string();
        let host_name = node.get("hostName").and_then(Value::as_str).unwrap_or_default().to_string();

        let group = role_to_group.get(&role).map(String::as_str).unwrap_or_default();
        let next = consumed.get(group).copied().unwrap_or(0);
        let Some(hw) = hw_nodes.get(group).and_then(|group_nodes| group_nodes.get(next)) else {
            unmatched.push(format!("Index: {}, Host Name: {}", i, host_name));
            continue;
        };

        let mut updated = node.clone();
        let credentials_name = if hw.bmc_credentials_name.is_empty() {
            generate_bmc_secret_name(&updated, request_name)?
        } else {
            hw.bmc_credentials_name.clone()
        };
        let boot_mac = boot_mac_address(&hw.interfaces, boot_interface_label).map_err(|e| {
            TemplateError::Interface(format!("failed to get boot MAC for node '{}': {}", host_name, e))
        })?;
        assign_mac_addresses(&mut updated, &hw.interfaces)
            .map_err(|e| TemplateError::Interface(format!("failed to assign MACs for node '{}': {}", host_name, e)))?;

        if let Some(map) = updated.as_object_mut() {
            map.insert("bmcAddress".to_string(), Value::String(hw.bmc_address.clone()));
            map.insert("bmcCredentialsName".to_string(), json!({"name": credentials_name}));
            map.insert("bootMACAddress".to_string(), Value::String(boot_mac));
            if let Some(namespace) = hw.host_namespace.as_deref().filter(|ns| !ns.is_empty()) {
                map.insert("hostRef".to_string(), json!({"name": hw.node_id, "namespace": namespace}));
            }
        }

        *node = updated;
        consumed.insert(group, next + 1);
        assignments.push(NodeAssignment {
            node_id: hw.node_id.clone(),
            host_name,
            bmc_credentials_name: credentials_name,
        });
    }

    if !unmatched.is_empty() {
        return Err(TemplateError::InvalidDocument(format!(
            "failed to find matches for the following nodes: {}",
            unmatched.join("; ")
        )));
    }

    info!("Applied hardware configuration to {} node(s)", assignments.len());
    Ok(assignments)
}

/// Wrap a rendered spec into a ClusterInstance resource
///
/// The resource is named after the cluster and lives in the namespace of the
/// same name.
pub fn build_cluster_instance(spec: Value, cluster_name: &str, labels: &BTreeMap<String, String>) -> Value {
    json!({
        "apiVersion": CLUSTER_INSTANCE_API_VERSION,
        "kind": CLUSTER_INSTANCE_KIND,
        "metadata": {
            "name": cluster_name,
            "namespace": cluster_name,
            "labels": labels,
        },
        "spec": spec,
    })
}
