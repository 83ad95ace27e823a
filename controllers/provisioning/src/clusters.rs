//! Cluster-installation and policy resources owned by other operators
//!
//! ClusterInstance, ManagedCluster and Policy have no Rust types here; they
//! are handled as dynamic objects and exchanged as JSON documents.

use async_trait::async_trait;
use kube::api::{ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams};
use kube::{Api, Client};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ControllerError;

/// Field manager recorded on objects written by the controller
pub const FIELD_MANAGER: &str = "provisioning-controller";

/// Access to the resources of the cluster-installation and policy subsystems
#[async_trait]
pub trait ClusterResources: Send + Sync {
    async fn get_cluster_instance(&self, namespace: &str, name: &str) -> Result<Option<Value>, ControllerError>;

    /// Create the ClusterInstance, or replace it when its spec differs
    ///
    /// With `dry_run` the API server validates the write without persisting it.
    async fn apply_cluster_instance(&self, document: &Value, dry_run: bool) -> Result<(), ControllerError>;

    /// Request deletion; returns true while the ClusterInstance still exists
    async fn delete_cluster_instance(&self, namespace: &str, name: &str) -> Result<bool, ControllerError>;

    async fn get_managed_cluster(&self, name: &str) -> Result<Option<Value>, ControllerError>;

    /// Policies propagated to the given cluster namespace
    async fn list_policies(&self, namespace: &str) -> Result<Vec<Value>, ControllerError>;
}

fn cluster_instance_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "siteconfig.open-cluster-management.io",
        "v1alpha1",
        "ClusterInstance",
    ))
}

fn managed_cluster_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("cluster.open-cluster-management.io", "v1", "ManagedCluster"))
}

fn policy_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("policy.open-cluster-management.io", "v1", "Policy"))
}

fn to_value(object: DynamicObject) -> Result<Value, ControllerError> {
    serde_json::to_value(object).map_err(|e| ControllerError::Store(format!("failed to encode object: {}", e)))
}

/// [`ClusterResources`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusters {
    client: Client,
}

impl KubeClusters {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn cluster_instances(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &cluster_instance_resource())
    }
}

#[async_trait]
impl ClusterResources for KubeClusters {
    async fn get_cluster_instance(&self, namespace: &str, name: &str) -> Result<Option<Value>, ControllerError> {
        self.cluster_instances(namespace)
            .get_opt(name)
            .await?
            .map(to_value)
            .transpose()
    }

    async fn apply_cluster_instance(&self, document: &Value, dry_run: bool) -> Result<(), ControllerError> {
        let mut desired: DynamicObject = serde_json::from_value(document.clone())
            .map_err(|e| ControllerError::Store(format!("invalid ClusterInstance document: {}", e)))?;
        let name = desired
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::Store("ClusterInstance document missing name".to_string()))?;
        let namespace = desired
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| ControllerError::Store(format!("ClusterInstance {} missing namespace", name)))?;

        let api = self.cluster_instances(&namespace);
        let pp = PostParams {
            dry_run,
            field_manager: Some(FIELD_MANAGER.to_string()),
        };

        match api.get_opt(&name).await? {
            None => {
                api.create(&pp, &desired).await?;
                if !dry_run {
                    info!("Created ClusterInstance {}/{}", namespace, name);
                }
            }
            Some(existing) => {
                if existing.data.get("spec") == desired.data.get("spec") {
                    debug!("ClusterInstance {}/{} is up to date", namespace, name);
                    return Ok(());
                }
                desired.metadata.resource_version = existing.metadata.resource_version.clone();
                api.replace(&name, &pp, &desired).await?;
                if !dry_run {
                    info!("Updated ClusterInstance {}/{}", namespace, name);
                }
            }
        }
        Ok(())
    }

    async fn delete_cluster_instance(&self, namespace: &str, name: &str) -> Result<bool, ControllerError> {
        let api = self.cluster_instances(namespace);
        let Some(existing) = api.get_opt(name).await? else {
            return Ok(false);
        };
        if existing.metadata.deletion_timestamp.is_none() {
            match api.delete(name, &DeleteParams::background()).await {
                Ok(_) => info!("Deleting ClusterInstance {}/{}", namespace, name),
                Err(kube::Error::Api(response)) if response.code == 404 => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    async fn get_managed_cluster(&self, name: &str) -> Result<Option<Value>, ControllerError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &managed_cluster_resource());
        api.get_opt(name).await?.map(to_value).transpose()
    }

    async fn list_policies(&self, namespace: &str) -> Result<Vec<Value>, ControllerError> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &policy_resource());
        api.list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .map(to_value)
            .collect()
    }
}

/// Conditions listed under `status.conditions` of a dynamic object
pub fn object_conditions(object: &Value) -> Vec<crds::Condition> {
    object
        .pointer("/status/conditions")
        .cloned()
        .and_then(|conditions| serde_json::from_value(conditions).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_conditions() {
        let object = json!({
            "status": {"conditions": [
                {"type": "Provisioned", "status": "False", "reason": "InProgress", "message": "Provisioning cluster"},
                {"type": "RenderedTemplates", "status": "True", "reason": "Completed", "message": ""}
            ]}
        });
        let conditions = object_conditions(&object);
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].reason, "InProgress");
        assert!(conditions[1].is_true());

        assert!(object_conditions(&json!({"status": {}})).is_empty());
    }

    #[test]
    fn test_resource_plurals() {
        assert_eq!(cluster_instance_resource().plural, "clusterinstances");
        assert_eq!(managed_cluster_resource().plural, "managedclusters");
        assert_eq!(policy_resource().plural, "policies");
    }
}
