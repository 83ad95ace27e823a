//! Access to the Kubernetes resources the controller reads and writes
//!
//! The reconciler only talks to the cluster through [`ProvisioningStore`]
//! so that unit tests can run against the in-memory store in `test_utils`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use crds::{ClusterTemplate, HardwarePlugin, HardwareTemplate, ProvisioningRequest};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::{debug, info};

use crate::error::ControllerError;

/// Typed access to the resources used during reconciliation
#[async_trait]
pub trait ProvisioningStore: Send + Sync {
    async fn get_provisioning_request(&self, name: &str) -> Result<Option<ProvisioningRequest>, ControllerError>;

    /// Replace the status of a request
    ///
    /// The write is conditional on `metadata.resourceVersion`; a stale
    /// version fails with a conflict.
    async fn update_provisioning_request_status(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningRequest, ControllerError>;

    async fn set_provisioning_request_finalizers(
        &self,
        request: &ProvisioningRequest,
        finalizers: Vec<String>,
    ) -> Result<(), ControllerError>;

    /// ClusterTemplate by name, searched across the watched namespaces
    async fn find_cluster_template(&self, name: &str) -> Result<Option<ClusterTemplate>, ControllerError>;

    async fn update_cluster_template_status(&self, template: &ClusterTemplate) -> Result<(), ControllerError>;

    async fn get_hardware_template(&self, name: &str) -> Result<Option<HardwareTemplate>, ControllerError>;

    async fn get_hardware_plugin(&self, name: &str) -> Result<Option<HardwarePlugin>, ControllerError>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ControllerError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError>;

    /// Create a secret; an existing secret with the same name is left untouched
    async fn create_secret(&self, secret: &Secret) -> Result<(), ControllerError>;

    /// Create a ConfigMap or replace the data of an existing one
    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<(), ControllerError>;

    /// Create the namespace unless it already exists
    async fn ensure_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<(), ControllerError>;

    /// Delete every namespace carrying `label=value`
    ///
    /// Returns whether any such namespace still existed, terminating ones included.
    async fn delete_labelled_namespaces(&self, label: &str, value: &str) -> Result<bool, ControllerError>;
}

/// [`ProvisioningStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    watch_namespace: Option<String>,
    controller_namespace: String,
}

impl KubeStore {
    pub fn new(client: Client, watch_namespace: Option<String>, controller_namespace: impl Into<String>) -> Self {
        Self {
            client,
            watch_namespace,
            controller_namespace: controller_namespace.into(),
        }
    }

    fn provisioning_requests(&self) -> Api<ProvisioningRequest> {
        Api::all(self.client.clone())
    }

    fn cluster_templates(&self) -> Api<ClusterTemplate> {
        match &self.watch_namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

fn conflict_or_kube(e: kube::Error, what: &str) -> ControllerError {
    match e {
        kube::Error::Api(ref response) if response.code == 409 => {
            ControllerError::Conflict(format!("{}: {}", what, response.message))
        }
        other => ControllerError::Kube(other),
    }
}

#[async_trait]
impl ProvisioningStore for KubeStore {
    async fn get_provisioning_request(&self, name: &str) -> Result<Option<ProvisioningRequest>, ControllerError> {
        Ok(self.provisioning_requests().get_opt(name).await?)
    }

    async fn update_provisioning_request_status(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningRequest, ControllerError> {
        let name = request
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::Store("ProvisioningRequest missing name".to_string()))?;
        let data = serde_json::to_vec(request)
            .map_err(|e| ControllerError::Store(format!("failed to serialize ProvisioningRequest {}: {}", name, e)))?;

        let updated = self
            .provisioning_requests()
            .replace_status(name, &PostParams::default(), data)
            .await
            .map_err(|e| conflict_or_kube(e, &format!("ProvisioningRequest {} status", name)))?;
        debug!("Updated status of ProvisioningRequest {}", name);
        Ok(updated)
    }

    async fn set_provisioning_request_finalizers(
        &self,
        request: &ProvisioningRequest,
        finalizers: Vec<String>,
    ) -> Result<(), ControllerError> {
        let name = request
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::Store("ProvisioningRequest missing name".to_string()))?;
        let patch = json!({
            "metadata": {
                "resourceVersion": request.metadata.resource_version,
                "finalizers": finalizers,
            }
        });
        self.provisioning_requests()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| conflict_or_kube(e, &format!("ProvisioningRequest {} finalizers", name)))?;
        Ok(())
    }

    async fn find_cluster_template(&self, name: &str) -> Result<Option<ClusterTemplate>, ControllerError> {
        let lp = ListParams::default().fields(&format!("metadata.name={}", name));
        let templates = self.cluster_templates().list(&lp).await?;
        if templates.items.len() > 1 {
            return Err(ControllerError::Input(format!(
                "found {} ClusterTemplates named {}, expected exactly one",
                templates.items.len(),
                name
            )));
        }
        Ok(templates.items.into_iter().next())
    }

    async fn update_cluster_template_status(&self, template: &ClusterTemplate) -> Result<(), ControllerError> {
        let name = template
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::Store("ClusterTemplate missing name".to_string()))?;
        let namespace = template
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| ControllerError::Store(format!("ClusterTemplate {} missing namespace", name)))?;

        let api: Api<ClusterTemplate> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": template.status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }

    async fn get_hardware_template(&self, name: &str) -> Result<Option<HardwareTemplate>, ControllerError> {
        let api: Api<HardwareTemplate> = Api::namespaced(self.client.clone(), &self.controller_namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_hardware_plugin(&self, name: &str) -> Result<Option<HardwarePlugin>, ControllerError> {
        let api: Api<HardwarePlugin> = Api::namespaced(self.client.clone(), &self.controller_namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ControllerError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), ControllerError> {
        let namespace = secret
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| ControllerError::Store("Secret missing namespace".to_string()))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                debug!("Secret {}/{:?} already exists", namespace, secret.metadata.name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<(), ControllerError> {
        let name = config_map
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::Store("ConfigMap missing name".to_string()))?;
        let namespace = config_map
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| ControllerError::Store(format!("ConfigMap {} missing namespace", name)))?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);

        match api.get_opt(name).await? {
            None => {
                api.create(&PostParams::default(), config_map).await?;
                info!("Created ConfigMap {}/{}", namespace, name);
            }
            Some(existing) if existing.data == config_map.data => {
                debug!("ConfigMap {}/{} is up to date", namespace, name);
            }
            Some(existing) => {
                let mut desired = config_map.clone();
                desired.metadata.resource_version = existing.metadata.resource_version;
                api.replace(name, &PostParams::default(), &desired)
                    .await
                    .map_err(|e| conflict_or_kube(e, &format!("ConfigMap {}/{}", namespace, name)))?;
                info!("Updated ConfigMap {}/{}", namespace, name);
            }
        }
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<(), ControllerError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(name).await?.is_some() {
            return Ok(());
        }
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &namespace).await {
            Ok(_) => {
                info!("Created namespace {}", name);
                Ok(())
            }
            Err(kube::Error::Api(response)) if response.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_labelled_namespaces(&self, label: &str, value: &str) -> Result<bool, ControllerError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = api
            .list(&ListParams::default().labels(&format!("{}={}", label, value)))
            .await?;
        for namespace in &namespaces.items {
            if namespace.metadata.deletion_timestamp.is_some() {
                continue;
            }
            let name = namespace.metadata.name.as_deref().unwrap_or_default();
            match api.delete(name, &DeleteParams::background()).await {
                Ok(_) => info!("Deleting namespace {}", name),
                Err(kube::Error::Api(response)) if response.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(!namespaces.items.is_empty())
    }
}
