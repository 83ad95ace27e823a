//! Mock HardwarePluginClient for unit testing
//!
//! Stores NodeAllocationRequests and allocated nodes in memory. Tests drive
//! the plugin side by setting conditions and allocated nodes directly, and
//! inspect the call counters to assert that no spurious work was triggered.

use crate::error::HwPluginError;
use crate::models::*;
use crate::plugin_trait::HardwarePluginClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock HardwarePluginClient for testing
#[derive(Clone, Debug)]
pub struct MockHardwarePluginClient {
    pub(crate) plugin_ref: String,
    pub(crate) requests: Arc<Mutex<HashMap<String, NodeAllocationRequestResponse>>>,
    pub(crate) allocated_nodes: Arc<Mutex<HashMap<String, Vec<AllocatedNode>>>>,
    pub(crate) fail_with: Arc<Mutex<Option<String>>>,
    pub(crate) create_calls: Arc<Mutex<u32>>,
    pub(crate) update_calls: Arc<Mutex<u32>>,
    pub(crate) delete_calls: Arc<Mutex<u32>>,
}

impl MockHardwarePluginClient {
    /// Create a new mock client
    pub fn new(plugin_ref: impl Into<String>) -> Self {
        Self {
            plugin_ref: plugin_ref.into(),
            requests: Arc::new(Mutex::new(HashMap::new())),
            allocated_nodes: Arc::new(Mutex::new(HashMap::new())),
            fail_with: Arc::new(Mutex::new(None)),
            create_calls: Arc::new(Mutex::new(0)),
            update_calls: Arc::new(Mutex::new(0)),
            delete_calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Set the Provisioned condition and observed transaction id of a request
    pub fn set_provisioned(&self, id: &str, status: &str, reason: &str, message: &str, observed_transaction_id: Option<i64>) {
        let mut requests = self.requests.lock().unwrap();
        let Some(response) = requests.get_mut(id) else {
            return;
        };
        let request_status = response.status.get_or_insert_with(NodeAllocationRequestStatus::default);
        request_status.conditions.retain(|c| c.type_ != CONDITION_PROVISIONED);
        request_status.conditions.push(Condition {
            type_: CONDITION_PROVISIONED.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Some(chrono::Utc::now()),
        });
        request_status.observed_config_transaction_id = observed_transaction_id;
    }

    /// Set the allocated nodes of a request (for test setup)
    pub fn set_allocated_nodes(&self, id: impl Into<String>, nodes: Vec<AllocatedNode>) {
        self.allocated_nodes.lock().unwrap().insert(id.into(), nodes);
    }

    /// Make every following call fail with an API error until cleared
    pub fn fail_with(&self, message: Option<&str>) {
        *self.fail_with.lock().unwrap() = message.map(str::to_string);
    }

    /// Stored request, if any
    pub fn stored_request(&self, id: &str) -> Option<NodeAllocationRequestResponse> {
        self.requests.lock().unwrap().get(id).cloned()
    }

    pub fn create_calls(&self) -> u32 {
        *self.create_calls.lock().unwrap()
    }

    pub fn update_calls(&self) -> u32 {
        *self.update_calls.lock().unwrap()
    }

    pub fn delete_calls(&self) -> u32 {
        *self.delete_calls.lock().unwrap()
    }

    fn check_failure(&self) -> Result<(), HwPluginError> {
        match self.fail_with.lock().unwrap().as_ref() {
            Some(message) => Err(HwPluginError::Api(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl HardwarePluginClientTrait for MockHardwarePluginClient {
    fn hardware_plugin_ref(&self) -> &str {
        &self.plugin_ref
    }

    async fn get_all_versions(&self) -> Result<ApiVersions, HwPluginError> {
        self.check_failure()?;
        Ok(ApiVersions {
            uri_prefix: Some("/hardware-manager/provisioning".to_string()),
            api_versions: vec![ApiVersion {
                version: Some("v1".to_string()),
            }],
        })
    }

    async fn get_minor_versions(&self) -> Result<ApiVersions, HwPluginError> {
        self.check_failure()?;
        Ok(ApiVersions {
            uri_prefix: Some("/hardware-manager/provisioning/v1".to_string()),
            api_versions: vec![ApiVersion {
                version: Some("v1".to_string()),
            }],
        })
    }

    async fn get_node_allocation_requests(&self) -> Result<Vec<NodeAllocationRequestResponse>, HwPluginError> {
        self.check_failure()?;
        Ok(self.requests.lock().unwrap().values().cloned().collect())
    }

    async fn get_node_allocation_request(&self, id: &str) -> Result<Option<NodeAllocationRequestResponse>, HwPluginError> {
        self.check_failure()?;
        Ok(self.requests.lock().unwrap().get(id).cloned())
    }

    async fn create_node_allocation_request(&self, request: &NodeAllocationRequest) -> Result<String, HwPluginError> {
        self.check_failure()?;
        *self.create_calls.lock().unwrap() += 1;
        let id = uuid::Uuid::new_v4().to_string();
        self.requests.lock().unwrap().insert(
            id.clone(),
            NodeAllocationRequestResponse {
                node_allocation_request: Some(request.clone()),
                status: Some(NodeAllocationRequestStatus::default()),
            },
        );
        Ok(id)
    }

    async fn update_node_allocation_request(&self, id: &str, request: &NodeAllocationRequest) -> Result<String, HwPluginError> {
        self.check_failure()?;
        let mut requests = self.requests.lock().unwrap();
        let stored = requests
            .get_mut(id)
            .ok_or_else(|| HwPluginError::NotFound(format!("NodeAllocationRequest '{}'", id)))?;
        *self.update_calls.lock().unwrap() += 1;
        stored.node_allocation_request = Some(request.clone());
        Ok(id.to_string())
    }

    async fn delete_node_allocation_request(&self, id: &str) -> Result<Option<String>, HwPluginError> {
        self.check_failure()?;
        *self.delete_calls.lock().unwrap() += 1;
        self.allocated_nodes.lock().unwrap().remove(id);
        Ok(self.requests.lock().unwrap().remove(id).map(|_| id.to_string()))
    }

    async fn get_allocated_nodes(&self) -> Result<Vec<AllocatedNode>, HwPluginError> {
        self.check_failure()?;
        Ok(self.allocated_nodes.lock().unwrap().values().flatten().cloned().collect())
    }

    async fn get_allocated_node(&self, id: &str) -> Result<AllocatedNode, HwPluginError> {
        self.check_failure()?;
        self.allocated_nodes
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|n| n.id == id)
            .cloned()
            .ok_or_else(|| HwPluginError::NotFound(format!("AllocatedNode '{}'", id)))
    }

    async fn get_allocated_nodes_from_node_allocation_request(&self, id: &str) -> Result<Vec<AllocatedNode>, HwPluginError> {
        self.check_failure()?;
        Ok(self.allocated_nodes.lock().unwrap().get(id).cloned().unwrap_or_default())
    }
}
