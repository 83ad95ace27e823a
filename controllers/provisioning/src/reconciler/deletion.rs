//! Teardown of a ProvisioningRequest behind its finalizer
//!
//! The ClusterInstance goes first, then the cluster namespace labelled with
//! the request name (with the secrets and ConfigMaps copied into it), then the
//! NodeAllocationRequest. Each step is awaited across reconciliations before
//! the next one starts.

use crds::{ProvisioningPhase, ProvisioningRequest, PROVISIONING_REQUEST_FINALIZER};
use tracing::{debug, info};

use super::{Reconciler, RequestState, Requeue, PROVISIONING_REQUEST_NAME_LABEL};
use crate::error::ControllerError;

impl Reconciler {
    pub(crate) async fn handle_deletion(&self, request: ProvisioningRequest) -> Result<Requeue, ControllerError> {
        let finalizers = request.metadata.finalizers.clone().unwrap_or_default();
        if !finalizers.iter().any(|f| f == PROVISIONING_REQUEST_FINALIZER) {
            debug!(
                "ProvisioningRequest {} is being deleted without our finalizer",
                request.metadata.name.as_deref().unwrap_or_default()
            );
            return Ok(Requeue::Done);
        }

        let mut state = RequestState::new(request);
        state
            .status
            .set_provisioning_state(ProvisioningPhase::Deleting, "Deletion is in progress");
        self.write_status(&mut state).await?;

        if let Some(name) = state
            .status
            .extensions
            .cluster_details
            .as_ref()
            .map(|d| d.name.clone())
            .filter(|name| !name.is_empty())
        {
            if self.clusters.delete_cluster_instance(&name, &name).await? {
                info!("Waiting for ClusterInstance {} to be deleted", name);
                return Ok(Requeue::Medium);
            }
        }

        if self
            .store
            .delete_labelled_namespaces(PROVISIONING_REQUEST_NAME_LABEL, state.name())
            .await?
        {
            info!("Waiting for the namespace of ProvisioningRequest {} to be deleted", state.name());
            return Ok(Requeue::Medium);
        }

        if let Some(reference) = state
            .status
            .extensions
            .node_allocation_request_ref
            .clone()
            .filter(|r| !r.node_allocation_request_id.is_empty())
        {
            let client = self.plugins.client_for(&reference.hardware_plugin_ref).await?;
            let id = reference.node_allocation_request_id.as_str();
            if client.delete_node_allocation_request(id).await?.is_some() {
                info!("Waiting for NodeAllocationRequest {} to be deleted", id);
                return Ok(Requeue::Medium);
            }
        }

        let remaining: Vec<String> = finalizers
            .into_iter()
            .filter(|f| f != PROVISIONING_REQUEST_FINALIZER)
            .collect();
        self.store
            .set_provisioning_request_finalizers(&state.request, remaining)
            .await?;
        self.metrics.forget(state.name());
        info!("ProvisioningRequest {} deleted", state.name());
        Ok(Requeue::Done)
    }
}
