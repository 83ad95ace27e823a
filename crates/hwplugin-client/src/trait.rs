//! HardwarePluginClient trait for mocking
//!
//! The concrete HardwarePluginClient implements this trait, and tests can use
//! mock implementations.

use crate::error::HwPluginError;
use crate::models::*;

/// Hardware plugin provisioning API operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait HardwarePluginClientTrait: Send + Sync {
    /// Name of the HardwarePlugin resource this client talks to
    fn hardware_plugin_ref(&self) -> &str;

    async fn get_all_versions(&self) -> Result<ApiVersions, HwPluginError>;
    async fn get_minor_versions(&self) -> Result<ApiVersions, HwPluginError>;

    async fn get_node_allocation_requests(&self) -> Result<Vec<NodeAllocationRequestResponse>, HwPluginError>;

    /// `None` when the plugin does not know the id
    async fn get_node_allocation_request(&self, id: &str) -> Result<Option<NodeAllocationRequestResponse>, HwPluginError>;

    /// Returns the id assigned by the plugin
    async fn create_node_allocation_request(&self, request: &NodeAllocationRequest) -> Result<String, HwPluginError>;

    async fn update_node_allocation_request(&self, id: &str, request: &NodeAllocationRequest) -> Result<String, HwPluginError>;

    /// `None` when the request no longer exists
    async fn delete_node_allocation_request(&self, id: &str) -> Result<Option<String>, HwPluginError>;

    async fn get_allocated_nodes(&self) -> Result<Vec<AllocatedNode>, HwPluginError>;
    async fn get_allocated_node(&self, id: &str) -> Result<AllocatedNode, HwPluginError>;
    async fn get_allocated_nodes_from_node_allocation_request(&self, id: &str) -> Result<Vec<AllocatedNode>, HwPluginError>;
}
