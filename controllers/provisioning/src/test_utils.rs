//! Test utilities for unit testing reconcilers
//!
//! In-memory implementations of the store, cluster and plugin seams plus
//! builders for the resources a ProvisioningRequest depends on.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use crds::*;
use hwplugin_client::{AllocatedNode, Bmc, HardwarePluginClientTrait, Interface, MockHardwarePluginClient};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::ByteString;
use serde_json::{json, Value};

use crate::clusters::ClusterResources;
use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::plugins::PluginClientFactory;
use crate::reconciler::{Reconciler, Requeue};
use crate::store::ProvisioningStore;

pub const TEST_CONTROLLER_NAMESPACE: &str = "oran-o2ims";
pub const TEST_HWPLUGIN_NAMESPACE: &str = "hardware-plugins";
pub const TEST_TEMPLATE_NAMESPACE: &str = "sno-ran-du-v4-Y-Z-1";
pub const TEST_TEMPLATE_ID: &str = "sno-ran-du.v4-Y-Z-1";
pub const TEST_CI_DEFAULTS: &str = "clusterinstance-defaults-v1";
pub const TEST_PT_DEFAULTS: &str = "policytemplate-defaults-v1";
pub const TEST_HW_TEMPLATE: &str = "placeholder-du-template-v1";
pub const TEST_PLUGIN: &str = "metal3-hwplugin";
pub const TEST_CLUSTER_NAME: &str = "site-sno-du-1";
pub const TEST_PULL_SECRET: &str = "pull-secret";

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// In-memory [`ProvisioningStore`]
///
/// Status writes check `resourceVersion` the way the API server does. Removing
/// the last finalizer of a deleting request removes the request.
#[derive(Clone, Default)]
pub struct MockStore {
    requests: Arc<Mutex<BTreeMap<String, ProvisioningRequest>>>,
    cluster_templates: Arc<Mutex<BTreeMap<String, ClusterTemplate>>>,
    hardware_templates: Arc<Mutex<BTreeMap<String, HardwareTemplate>>>,
    hardware_plugins: Arc<Mutex<BTreeMap<String, HardwarePlugin>>>,
    config_maps: Arc<Mutex<BTreeMap<Key, ConfigMap>>>,
    secrets: Arc<Mutex<BTreeMap<Key, Secret>>>,
    namespaces: Arc<Mutex<BTreeMap<String, BTreeMap<String, String>>>>,
    pending_conflicts: Arc<Mutex<u32>>,
    status_updates: Arc<Mutex<u32>>,
    resource_version: Arc<Mutex<u64>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_resource_version(&self) -> String {
        let mut version = self.resource_version.lock().unwrap();
        *version += 1;
        version.to_string()
    }

    pub fn add_provisioning_request(&self, mut request: ProvisioningRequest) {
        request.metadata.resource_version = Some(self.next_resource_version());
        let name = request.metadata.name.clone().unwrap_or_default();
        self.requests.lock().unwrap().insert(name, request);
    }

    pub fn provisioning_request(&self, name: &str) -> Option<ProvisioningRequest> {
        self.requests.lock().unwrap().get(name).cloned()
    }

    /// Replace the spec of a stored request and bump its generation
    pub fn update_provisioning_request_spec(&self, name: &str, update: impl FnOnce(&mut ProvisioningRequestSpec)) {
        let version = self.next_resource_version();
        let mut requests = self.requests.lock().unwrap();
        let request = requests.get_mut(name).unwrap();
        update(&mut request.spec);
        request.metadata.generation = Some(request.metadata.generation.unwrap_or(1) + 1);
        request.metadata.resource_version = Some(version);
    }

    /// Edit the stored status of a request, as another writer would
    pub fn update_status(&self, name: &str, update: impl FnOnce(&mut ProvisioningRequestStatus)) {
        let version = self.next_resource_version();
        let mut requests = self.requests.lock().unwrap();
        let request = requests.get_mut(name).unwrap();
        update(request.status.get_or_insert_with(Default::default));
        request.metadata.resource_version = Some(version);
    }

    /// Mark a stored request as deleted
    pub fn mark_deleted(&self, name: &str) {
        let version = self.next_resource_version();
        let mut requests = self.requests.lock().unwrap();
        let request = requests.get_mut(name).unwrap();
        request.metadata.deletion_timestamp = Some(Time(Utc::now()));
        request.metadata.resource_version = Some(version);
    }

    /// Make the next `count` status writes fail with a conflict
    pub fn inject_conflicts(&self, count: u32) {
        *self.pending_conflicts.lock().unwrap() = count;
    }

    pub fn status_updates(&self) -> u32 {
        *self.status_updates.lock().unwrap()
    }

    pub fn add_cluster_template(&self, template: ClusterTemplate) {
        let name = template.metadata.name.clone().unwrap_or_default();
        self.cluster_templates.lock().unwrap().insert(name, template);
    }

    pub fn cluster_template(&self, name: &str) -> Option<ClusterTemplate> {
        self.cluster_templates.lock().unwrap().get(name).cloned()
    }

    pub fn add_hardware_template(&self, template: HardwareTemplate) {
        let name = template.metadata.name.clone().unwrap_or_default();
        self.hardware_templates.lock().unwrap().insert(name, template);
    }

    pub fn add_hardware_plugin(&self, plugin: HardwarePlugin) {
        let name = plugin.metadata.name.clone().unwrap_or_default();
        self.hardware_plugins.lock().unwrap().insert(name, plugin);
    }

    pub fn add_config_map(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };
        self.config_maps.lock().unwrap().insert(key(namespace, name), config_map);
    }

    pub fn add_secret(&self, secret: Secret) {
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.secrets.lock().unwrap().insert(key(&namespace, &name), secret);
    }

    pub fn remove_secret(&self, namespace: &str, name: &str) {
        self.secrets.lock().unwrap().remove(&key(namespace, name));
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.config_maps.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.namespaces.lock().unwrap().contains_key(name)
    }

    fn check_resource_version(&self, request: &ProvisioningRequest) -> Result<String, ControllerError> {
        let name = request.metadata.name.clone().unwrap_or_default();
        let requests = self.requests.lock().unwrap();
        let stored = requests
            .get(&name)
            .ok_or_else(|| ControllerError::Store(format!("ProvisioningRequest {} not found", name)))?;
        if stored.metadata.resource_version != request.metadata.resource_version {
            return Err(ControllerError::Conflict(format!(
                "ProvisioningRequest {} has been modified",
                name
            )));
        }
        Ok(name)
    }
}

#[async_trait]
impl ProvisioningStore for MockStore {
    async fn get_provisioning_request(&self, name: &str) -> Result<Option<ProvisioningRequest>, ControllerError> {
        Ok(self.provisioning_request(name))
    }

    async fn update_provisioning_request_status(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningRequest, ControllerError> {
        {
            let mut pending = self.pending_conflicts.lock().unwrap();
            if *pending > 0 {
                *pending -= 1;
                // A concurrent writer bumps the stored version
                drop(pending);
                let version = self.next_resource_version();
                let name = request.metadata.name.clone().unwrap_or_default();
                if let Some(stored) = self.requests.lock().unwrap().get_mut(&name) {
                    stored.metadata.resource_version = Some(version);
                }
                return Err(ControllerError::Conflict("injected conflict".to_string()));
            }
        }
        let name = self.check_resource_version(request)?;
        let version = self.next_resource_version();
        let mut requests = self.requests.lock().unwrap();
        let stored = requests.get_mut(&name).unwrap();
        stored.status = request.status.clone();
        stored.metadata.resource_version = Some(version);
        *self.status_updates.lock().unwrap() += 1;
        Ok(stored.clone())
    }

    async fn set_provisioning_request_finalizers(
        &self,
        request: &ProvisioningRequest,
        finalizers: Vec<String>,
    ) -> Result<(), ControllerError> {
        let name = self.check_resource_version(request)?;
        let version = self.next_resource_version();
        let mut requests = self.requests.lock().unwrap();
        let stored = requests.get_mut(&name).unwrap();
        if finalizers.is_empty() && stored.metadata.deletion_timestamp.is_some() {
            requests.remove(&name);
            return Ok(());
        }
        stored.metadata.finalizers = Some(finalizers);
        stored.metadata.resource_version = Some(version);
        Ok(())
    }

    async fn find_cluster_template(&self, name: &str) -> Result<Option<ClusterTemplate>, ControllerError> {
        Ok(self.cluster_template(name))
    }

    async fn update_cluster_template_status(&self, template: &ClusterTemplate) -> Result<(), ControllerError> {
        let name = template.metadata.name.clone().unwrap_or_default();
        if let Some(stored) = self.cluster_templates.lock().unwrap().get_mut(&name) {
            stored.status = template.status.clone();
        }
        Ok(())
    }

    async fn get_hardware_template(&self, name: &str) -> Result<Option<HardwareTemplate>, ControllerError> {
        Ok(self.hardware_templates.lock().unwrap().get(name).cloned())
    }

    async fn get_hardware_plugin(&self, name: &str) -> Result<Option<HardwarePlugin>, ControllerError> {
        Ok(self.hardware_plugins.lock().unwrap().get(name).cloned())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ControllerError> {
        Ok(self.config_maps.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), ControllerError> {
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.secrets
            .lock()
            .unwrap()
            .entry(key(&namespace, &name))
            .or_insert_with(|| secret.clone());
        Ok(())
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<(), ControllerError> {
        let namespace = config_map.metadata.namespace.clone().unwrap_or_default();
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.config_maps
            .lock()
            .unwrap()
            .insert(key(&namespace, &name), config_map.clone());
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<(), ControllerError> {
        self.namespaces
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| labels.clone());
        Ok(())
    }

    /// Deleted namespaces disappear at once, together with their secrets and ConfigMaps
    async fn delete_labelled_namespaces(&self, label: &str, value: &str) -> Result<bool, ControllerError> {
        let mut namespaces = self.namespaces.lock().unwrap();
        let deleted: Vec<String> = namespaces
            .iter()
            .filter(|(_, labels)| labels.get(label).map(String::as_str) == Some(value))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &deleted {
            namespaces.remove(name);
            self.secrets.lock().unwrap().retain(|(namespace, _), _| namespace != name);
            self.config_maps.lock().unwrap().retain(|(namespace, _), _| namespace != name);
        }
        Ok(!deleted.is_empty())
    }
}

/// In-memory [`ClusterResources`]
///
/// Applied ClusterInstances keep the status set by tests. A deleted
/// ClusterInstance disappears after one reconciliation.
#[derive(Clone, Default)]
pub struct MockClusters {
    cluster_instances: Arc<Mutex<BTreeMap<Key, Value>>>,
    managed_clusters: Arc<Mutex<BTreeMap<String, Value>>>,
    policies: Arc<Mutex<BTreeMap<String, Vec<Value>>>>,
    dry_run_error: Arc<Mutex<Option<String>>>,
    applies: Arc<Mutex<u32>>,
    dry_runs: Arc<Mutex<u32>>,
}

impl MockClusters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cluster_instance(&self, namespace: &str, name: &str) -> Option<Value> {
        self.cluster_instances.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    /// Set `status.conditions` of a stored ClusterInstance
    pub fn set_cluster_instance_conditions(&self, namespace: &str, name: &str, conditions: &[(&str, &str, &str, &str)]) {
        let mut instances = self.cluster_instances.lock().unwrap();
        let Some(instance) = instances.get_mut(&key(namespace, name)) else {
            return;
        };
        let conditions: Vec<Value> = conditions
            .iter()
            .map(|(type_, status, reason, message)| {
                json!({"type": type_, "status": status, "reason": reason, "message": message})
            })
            .collect();
        instance["status"] = json!({"conditions": conditions});
    }

    pub fn add_managed_cluster(&self, name: &str, managed_cluster: Value) {
        self.managed_clusters.lock().unwrap().insert(name.to_string(), managed_cluster);
    }

    pub fn set_policies(&self, namespace: &str, policies: Vec<Value>) {
        self.policies.lock().unwrap().insert(namespace.to_string(), policies);
    }

    pub fn fail_dry_run(&self, message: Option<&str>) {
        *self.dry_run_error.lock().unwrap() = message.map(str::to_string);
    }

    pub fn applies(&self) -> u32 {
        *self.applies.lock().unwrap()
    }

    pub fn dry_runs(&self) -> u32 {
        *self.dry_runs.lock().unwrap()
    }
}

#[async_trait]
impl ClusterResources for MockClusters {
    async fn get_cluster_instance(&self, namespace: &str, name: &str) -> Result<Option<Value>, ControllerError> {
        Ok(self.cluster_instance(namespace, name))
    }

    async fn apply_cluster_instance(&self, document: &Value, dry_run: bool) -> Result<(), ControllerError> {
        if dry_run {
            *self.dry_runs.lock().unwrap() += 1;
            if let Some(message) = self.dry_run_error.lock().unwrap().as_ref() {
                return Err(ControllerError::Input(format!(
                    "failed to validate the rendered ClusterInstance with dry-run: {}",
                    message
                )));
            }
            return Ok(());
        }

        let namespace = document.pointer("/metadata/namespace").and_then(Value::as_str).unwrap_or_default();
        let name = document.pointer("/metadata/name").and_then(Value::as_str).unwrap_or_default();
        let mut instances = self.cluster_instances.lock().unwrap();
        match instances.get_mut(&key(namespace, name)) {
            Some(existing) if existing.get("spec") == document.get("spec") => {}
            Some(existing) => {
                existing["spec"] = document["spec"].clone();
                *self.applies.lock().unwrap() += 1;
            }
            None => {
                instances.insert(key(namespace, name), document.clone());
                *self.applies.lock().unwrap() += 1;
            }
        }
        Ok(())
    }

    async fn delete_cluster_instance(&self, namespace: &str, name: &str) -> Result<bool, ControllerError> {
        Ok(self.cluster_instances.lock().unwrap().remove(&key(namespace, name)).is_some())
    }

    async fn get_managed_cluster(&self, name: &str) -> Result<Option<Value>, ControllerError> {
        Ok(self.managed_clusters.lock().unwrap().get(name).cloned())
    }

    async fn list_policies(&self, namespace: &str) -> Result<Vec<Value>, ControllerError> {
        Ok(self.policies.lock().unwrap().get(namespace).cloned().unwrap_or_default())
    }
}

/// [`PluginClientFactory`] handing out one shared mock client
#[derive(Clone)]
pub struct MockPlugins {
    pub client: MockHardwarePluginClient,
}

impl MockPlugins {
    pub fn new(plugin_ref: &str) -> Self {
        Self {
            client: MockHardwarePluginClient::new(plugin_ref),
        }
    }
}

#[async_trait]
impl PluginClientFactory for MockPlugins {
    async fn client_for(&self, plugin_ref: &str) -> Result<Arc<dyn HardwarePluginClientTrait>, ControllerError> {
        if plugin_ref != self.client.hardware_plugin_ref() {
            return Err(ControllerError::Input(format!(
                "HardwarePlugin {} not found in namespace {}",
                plugin_ref, TEST_CONTROLLER_NAMESPACE
            )));
        }
        Ok(Arc::new(self.client.clone()))
    }
}

pub fn create_test_config() -> Config {
    let mut config = Config::from_lookup(|_| None).unwrap();
    config.controller_namespace = TEST_CONTROLLER_NAMESPACE.to_string();
    config.hwplugin_namespace = TEST_HWPLUGIN_NAMESPACE.to_string();
    config
}

pub fn create_test_secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn create_test_hardware_plugin(name: &str, auth_client_config: AuthClientConfig) -> HardwarePlugin {
    HardwarePlugin {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_CONTROLLER_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: HardwarePluginSpec {
            api_root: format!("https://{}.{}.svc:8443", name, TEST_CONTROLLER_NAMESPACE),
            auth_client_config,
        },
        status: None,
    }
}

/// HardwareTemplate with a `controller` group for masters and a `worker` group
pub fn create_test_hardware_template(name: &str) -> HardwareTemplate {
    HardwareTemplate {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_CONTROLLER_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: HardwareTemplateSpec {
            hardware_plugin_ref: TEST_PLUGIN.to_string(),
            boot_interface_label: "bootable-interface".to_string(),
            node_group_data: vec![
                NodeGroupData {
                    name: "controller".to_string(),
                    role: "master".to_string(),
                    hw_profile: "profile-spr-single-processor-64G".to_string(),
                    resource_pool_id: Some("xyz".to_string()),
                    size: None,
                },
                NodeGroupData {
                    name: "worker".to_string(),
                    role: "worker".to_string(),
                    hw_profile: "profile-spr-dual-processor-128G".to_string(),
                    resource_pool_id: Some("xyz".to_string()),
                    size: None,
                },
            ],
            hardware_provisioning_timeout: None,
            extensions: BTreeMap::new(),
        },
        status: None,
    }
}

/// Template parameter schema for a single-node cluster
pub fn test_template_schema() -> Value {
    let interface = json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "label": {"type": "string"},
            "macAddress": {"type": "string"}
        }
    });
    json!({
        "type": "object",
        "required": ["nodeClusterName", "oCloudSiteId", "clusterInstanceParameters", "policyTemplateParameters"],
        "properties": {
            "nodeClusterName": {"type": "string"},
            "oCloudSiteId": {"type": "string"},
            "clusterInstanceParameters": {
                "type": "object",
                "required": ["clusterName", "nodes"],
                "properties": {
                    "clusterName": {"type": "string"},
                    "baseDomain": {"type": "string"},
                    "extraLabels": {
                        "type": "object",
                        "properties": {"ManagedCluster": {"type": "object"}}
                    },
                    "nodes": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "hostName": {"type": "string"},
                                "role": {"type": "string"},
                                "templateRefs": {"type": "array"},
                                "nodeNetwork": {
                                    "type": "object",
                                    "properties": {
                                        "interfaces": {"type": "array", "items": interface}
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "policyTemplateParameters": {
                "type": "object",
                "properties": {
                    "sriov-network-vlan-1": {"type": "string"},
                    "cpu-isolated": {"type": "string"}
                }
            }
        }
    })
}

pub fn create_test_cluster_template() -> ClusterTemplate {
    ClusterTemplate {
        metadata: ObjectMeta {
            name: Some(TEST_TEMPLATE_ID.to_string()),
            namespace: Some(TEST_TEMPLATE_NAMESPACE.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: ClusterTemplateSpec {
            name: "sno-ran-du".to_string(),
            version: "v4-Y-Z-1".to_string(),
            description: "Single-node DU cluster".to_string(),
            templates: Templates {
                cluster_instance_defaults: TEST_CI_DEFAULTS.to_string(),
                policy_template_defaults: TEST_PT_DEFAULTS.to_string(),
                hw_template: Some(TEST_HW_TEMPLATE.to_string()),
            },
            template_parameter_schema: test_template_schema(),
        },
        status: Some(ClusterTemplateStatus {
            conditions: vec![Condition::new(
                CLUSTER_TEMPLATE_VALIDATED,
                ConditionStatus::True,
                "Completed",
                "The cluster template validation succeeded",
            )],
            observed_generation: Some(1),
        }),
    }
}

pub const TEST_CLUSTER_INSTANCE_DEFAULTS: &str = r#"
clusterImageSetNameRef: "4.16"
pullSecretRef:
  name: pull-secret
templateRefs:
  - name: ai-cluster-templates-v1
    namespace: siteconfig-operator
extraLabels:
  ManagedCluster:
    cluster-version: v4-Y-Z-1
    sno-ran-du-policy: v1
nodes:
  - role: master
    templateRefs:
      - name: ai-node-templates-v1
        namespace: siteconfig-operator
    nodeNetwork:
      interfaces:
        - name: eno1
          label: bootable-interface
"#;

pub const TEST_POLICY_TEMPLATE_DEFAULTS: &str = r#"
cpu-isolated: "2-31"
sriov-network-vlan-1: "114"
"#;

pub fn test_template_parameters() -> Value {
    json!({
        "nodeClusterName": "exampleCluster",
        "oCloudSiteId": "local-west-12345",
        "clusterInstanceParameters": {
            "clusterName": TEST_CLUSTER_NAME,
            "baseDomain": "example.com",
            "nodes": [{
                "hostName": "node1.example.com",
                "nodeNetwork": {
                    "interfaces": [{"name": "eno1", "label": "bootable-interface"}]
                }
            }]
        },
        "policyTemplateParameters": {
            "sriov-network-vlan-1": "140"
        }
    })
}

pub fn create_test_provisioning_request(name: &str, template_parameters: Value) -> ProvisioningRequest {
    ProvisioningRequest {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            generation: Some(1),
            finalizers: Some(vec![PROVISIONING_REQUEST_FINALIZER.to_string()]),
            ..Default::default()
        },
        spec: ProvisioningRequestSpec {
            name: "example cluster".to_string(),
            description: String::new(),
            template_name: "sno-ran-du".to_string(),
            template_version: "v4-Y-Z-1".to_string(),
            template_parameters,
            extensions: None,
        },
        status: None,
    }
}

pub fn create_test_allocated_node(id: &str, group: &str) -> AllocatedNode {
    AllocatedNode {
        id: id.to_string(),
        group_name: group.to_string(),
        hw_profile: "profile-spr-single-processor-64G".to_string(),
        bmc: Bmc {
            address: format!("idrac-virtualmedia+https://203.0.113.5/redfish/v1/Systems/{}", id),
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

/// ManagedCluster that is available, accepted and joined
pub fn create_test_managed_cluster(name: &str) -> Value {
    json!({
        "apiVersion": "cluster.open-cluster-management.io/v1",
        "kind": "ManagedCluster",
        "metadata": {"name": name, "labels": {"clusterID": "76b8cbad-9928-48a0-bcf0-bb16a777b5f7"}},
        "status": {"conditions": [
            {"type": "ManagedClusterConditionAvailable", "status": "True", "reason": "ManagedClusterAvailable", "message": ""},
            {"type": "HubAcceptedManagedCluster", "status": "True", "reason": "HubClusterAdminAccepted", "message": ""},
            {"type": "ManagedClusterJoined", "status": "True", "reason": "ManagedClusterJoined", "message": ""}
        ]}
    })
}

pub fn create_test_policy(name: &str, namespace: &str, compliant: &str, remediation_action: &str) -> Value {
    json!({
        "apiVersion": "policy.open-cluster-management.io/v1",
        "kind": "Policy",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"remediationAction": remediation_action},
        "status": {"compliant": compliant}
    })
}

/// A reconciler over in-memory seams, seeded with a valid template set
pub struct TestEnv {
    pub store: MockStore,
    pub clusters: MockClusters,
    pub plugins: MockPlugins,
    pub metrics: Arc<Metrics>,
    pub reconciler: Reconciler,
}

impl TestEnv {
    pub fn new() -> Self {
        let store = MockStore::new();
        store.add_cluster_template(create_test_cluster_template());
        store.add_hardware_template(create_test_hardware_template(TEST_HW_TEMPLATE));
        store.add_config_map(
            TEST_TEMPLATE_NAMESPACE,
            TEST_CI_DEFAULTS,
            BTreeMap::from([("clusterinstance-defaults".to_string(), TEST_CLUSTER_INSTANCE_DEFAULTS.to_string())]),
        );
        store.add_config_map(
            TEST_TEMPLATE_NAMESPACE,
            TEST_PT_DEFAULTS,
            BTreeMap::from([("policytemplate-defaults".to_string(), TEST_POLICY_TEMPLATE_DEFAULTS.to_string())]),
        );
        store.add_secret(create_test_secret(
            TEST_TEMPLATE_NAMESPACE,
            TEST_PULL_SECRET,
            &[(".dockerconfigjson", "{\"auths\":{}}")],
        ));

        let clusters = MockClusters::new();
        let plugins = MockPlugins::new(TEST_PLUGIN);
        let metrics = Arc::new(Metrics::new().unwrap());
        let reconciler = Reconciler::new(
            create_test_config(),
            Arc::new(store.clone()),
            Arc::new(clusters.clone()),
            Arc::new(plugins.clone()),
            metrics.clone(),
        );
        Self {
            store,
            clusters,
            plugins,
            metrics,
            reconciler,
        }
    }

    /// Store a request built from the given parameters and return its name
    pub fn add_request(&self, name: &str, template_parameters: Value) -> String {
        self.store
            .add_provisioning_request(create_test_provisioning_request(name, template_parameters));
        name.to_string()
    }

    /// Reconcile the stored version of a request
    pub async fn reconcile(&self, name: &str) -> Result<Requeue, ControllerError> {
        let request = self
            .store
            .provisioning_request(name)
            .ok_or_else(|| ControllerError::Store(format!("ProvisioningRequest {} not found", name)))?;
        self.reconciler.reconcile_provisioning_request(&request).await
    }

    pub fn provisioning_request_exists(&self, name: &str) -> bool {
        self.store.provisioning_request(name).is_some()
    }

    pub fn status(&self, name: &str) -> ProvisioningRequestStatus {
        self.store
            .provisioning_request(name)
            .and_then(|r| r.status)
            .unwrap_or_default()
    }

    pub fn condition(&self, name: &str, condition_type: ConditionType) -> Option<Condition> {
        self.status(name).condition(condition_type).cloned()
    }

    pub fn node_allocation_request_id(&self, name: &str) -> String {
        self.status(name)
            .node_allocation_request_id()
            .unwrap_or_default()
            .to_string()
    }

    /// Mark the NodeAllocationRequest provisioned and allocate one master node
    pub fn complete_hardware(&self, name: &str) {
        let id = self.node_allocation_request_id(name);
        self.plugins
            .client
            .set_provisioned(&id, "True", "Completed", "Provisioned", Some(1));
        self.plugins
            .client
            .set_allocated_nodes(id.clone(), vec![create_test_allocated_node("node-1", "controller")]);
        self.store.add_secret(create_test_secret(
            TEST_HWPLUGIN_NAMESPACE,
            "node-1-bmc-secret",
            &[("username", "admin"), ("password", "password")],
        ));
    }

    /// Drive a request through hardware provisioning and ClusterInstance processing
    ///
    /// Leaves the ClusterInstance installed and the ManagedCluster ready, so the
    /// next reconciliations complete ClusterProvisioned and evaluate policies.
    pub async fn install_cluster(&self, name: &str) -> Result<(), ControllerError> {
        self.reconcile_until_settled(name).await?;
        self.complete_hardware(name);
        self.reconcile_until_settled(name).await?;
        self.clusters.set_cluster_instance_conditions(
            TEST_CLUSTER_NAME,
            TEST_CLUSTER_NAME,
            &[
                ("ClusterInstanceValidated", "True", "Completed", "Validation succeeded"),
                ("RenderedTemplates", "True", "Completed", "Rendered templates successfully"),
                ("RenderedTemplatesValidated", "True", "Completed", "Rendered templates validation succeeded"),
                ("RenderedTemplatesApplied", "True", "Completed", "Applied site config manifests"),
                ("Provisioned", "True", "Completed", "Provisioning completed"),
            ],
        );
        self.clusters
            .add_managed_cluster(TEST_CLUSTER_NAME, create_test_managed_cluster(TEST_CLUSTER_NAME));
        Ok(())
    }

    /// Reconcile until the request stops asking for an immediate next phase
    pub async fn reconcile_until_settled(&self, name: &str) -> Result<Requeue, ControllerError> {
        for _ in 0..20 {
            let requeue = self.reconcile(name).await?;
            if requeue != Requeue::Short {
                return Ok(requeue);
            }
        }
        Ok(Requeue::Short)
    }
}
