//! Hardware plugin provisioning API client
//!
//! Endpoints live under `<apiRoot>/hardware-manager/provisioning/v1`. Mutating
//! calls are asynchronous on the plugin side and answer 202 with the request id.

use crate::common::{error_from_response, ClientAuth, HttpClient, RetryPolicy};
use crate::error::HwPluginError;
use crate::models::*;
use crate::plugin_trait::HardwarePluginClientTrait;
use reqwest::{Certificate, Client, Identity, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

/// Path prefix of the provisioning API
pub const PROVISIONING_API_PATH: &str = "/hardware-manager/provisioning";

/// Path of the provisioning API version served by this client
pub const PROVISIONING_API_V1_PATH: &str = "/hardware-manager/provisioning/v1";

const NODE_ALLOCATION_REQUEST: &str = "NodeAllocationRequest";
const ALLOCATED_NODE: &str = "AllocatedNode";

/// TLS material for talking to the plugin
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// PEM bundle of additional trusted CAs
    pub ca_bundle: Option<Vec<u8>>,
    /// PEM client certificate followed by its private key
    pub identity_pem: Option<Vec<u8>>,
}

/// Options used to build a [`HardwarePluginClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub auth: ClientAuth,
    pub tls: TlsOptions,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auth: ClientAuth::None,
            tls: TlsOptions::default(),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Hardware plugin API client
#[derive(Debug, Clone)]
pub struct HardwarePluginClient {
    http: HttpClient,
    api_root: String,
    plugin_ref: String,
}

impl HardwarePluginClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `plugin_ref` - name of the HardwarePlugin resource
    /// * `api_root` - plugin root URL (e.g., "https://metal3-hwplugin:8443")
    /// * `options` - authentication, TLS, retry and timeout settings
    pub fn new(plugin_ref: impl Into<String>, api_root: &str, options: ClientOptions) -> Result<Self, HwPluginError> {
        let mut builder = Client::builder().timeout(options.timeout);

        if let Some(ca_bundle) = &options.tls.ca_bundle {
            for cert in Certificate::from_pem_bundle(ca_bundle)? {
                builder = builder.add_root_certificate(cert);
            }
        }
        if let Some(identity_pem) = &options.tls.identity_pem {
            let identity = Identity::from_pem(identity_pem)
                .map_err(|e| HwPluginError::Authentication(format!("invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }

        let client = builder.build()?;
        let api_root = api_root.trim_end_matches('/').to_string();
        let base_url = format!("{}{}", api_root, PROVISIONING_API_V1_PATH);

        Ok(Self {
            http: HttpClient::new(client, base_url, options.auth, options.retry),
            api_root,
            plugin_ref: plugin_ref.into(),
        })
    }

    /// Get the base URL of the v1 provisioning API
    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    fn node_allocation_request_path(id: &str) -> String {
        format!("/node-allocation-requests/{}", urlencoding::encode(id))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<T, HwPluginError> {
        let response = self.http.send(Method::GET, url, None).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(HwPluginError::NotFound(format!("{} '{}'", resource_type, resource_id)));
        }
        if status != StatusCode::OK {
            return Err(error_from_response(response, resource_type, resource_id, &Method::GET).await);
        }
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn send_accepted(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        resource_id: &str,
    ) -> Result<String, HwPluginError> {
        let response = self.http.send(method.clone(), url, body).await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(error_from_response(response, NODE_ALLOCATION_REQUEST, resource_id, &method).await);
        }
        let text = response.text().await?;
        let id: String = serde_json::from_str(&text).map_err(|e| {
            HwPluginError::Api(format!(
                "received invalid response for {} {} '{}': {}",
                method, NODE_ALLOCATION_REQUEST, resource_id, e
            ))
        })?;
        Ok(id)
    }
}

#[async_trait::async_trait]
impl HardwarePluginClientTrait for HardwarePluginClient {
    fn hardware_plugin_ref(&self) -> &str {
        &self.plugin_ref
    }

    async fn get_all_versions(&self) -> Result<ApiVersions, HwPluginError> {
        let url = format!("{}{}/api-versions", self.api_root, PROVISIONING_API_PATH);
        self.get_json(&url, "APIVersions", "").await
    }

    async fn get_minor_versions(&self) -> Result<ApiVersions, HwPluginError> {
        let url = self.http.build_url("/api-versions");
        self.get_json(&url, "APIVersions", "v1").await
    }

    async fn get_node_allocation_requests(&self) -> Result<Vec<NodeAllocationRequestResponse>, HwPluginError> {
        let url = self.http.build_url("/node-allocation-requests");
        self.get_json(&url, NODE_ALLOCATION_REQUEST, "").await
    }

    async fn get_node_allocation_request(&self, id: &str) -> Result<Option<NodeAllocationRequestResponse>, HwPluginError> {
        match self
            .get_json(&self.http.build_url(&Self::node_allocation_request_path(id)), NODE_ALLOCATION_REQUEST, id)
            .await
        {
            Ok(response) => Ok(Some(response)),
            Err(HwPluginError::NotFound(_)) => {
                info!("NodeAllocationRequest {} not found", id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_node_allocation_request(&self, request: &NodeAllocationRequest) -> Result<String, HwPluginError> {
        let body = serde_json::to_value(request)?;
        let url = self.http.build_url("/node-allocation-requests");
        let id = self.send_accepted(Method::POST, &url, Some(&body), "").await?;
        debug!("Created NodeAllocationRequest {} for cluster {}", id, request.cluster_id);
        Ok(id)
    }

    async fn update_node_allocation_request(&self, id: &str, request: &NodeAllocationRequest) -> Result<String, HwPluginError> {
        let body = serde_json::to_value(request)?;
        let url = self.http.build_url(&Self::node_allocation_request_path(id));
        let updated = self.send_accepted(Method::PUT, &url, Some(&body), id).await?;
        debug!("Updated NodeAllocationRequest {}", updated);
        Ok(updated)
    }

    async fn delete_node_allocation_request(&self, id: &str) -> Result<Option<String>, HwPluginError> {
        if self.get_node_allocation_request(id).await?.is_none() {
            return Ok(None);
        }

        let url = self.http.build_url(&Self::node_allocation_request_path(id));
        match self.send_accepted(Method::DELETE, &url, None, id).await {
            Ok(deleted) => Ok(Some(deleted)),
            Err(HwPluginError::UnexpectedResponse { code: 404, .. } | HwPluginError::Problem { code: 404, .. }) => {
                info!("NodeAllocationRequest {} not found", id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_allocated_nodes(&self) -> Result<Vec<AllocatedNode>, HwPluginError> {
        let url = self.http.build_url("/allocated-nodes");
        self.get_json(&url, ALLOCATED_NODE, "").await
    }

    async fn get_allocated_node(&self, id: &str) -> Result<AllocatedNode, HwPluginError> {
        let url = self.http.build_url(&format!("/allocated-nodes/{}", urlencoding::encode(id)));
        self.get_json(&url, ALLOCATED_NODE, id).await
    }

    async fn get_allocated_nodes_from_node_allocation_request(&self, id: &str) -> Result<Vec<AllocatedNode>, HwPluginError> {
        let url = self
            .http
            .build_url(&format!("{}/allocated-nodes", Self::node_allocation_request_path(id)));
        self.get_json(&url, "AllocatedNodesFromNodeAllocationRequest", id).await
    }
}
