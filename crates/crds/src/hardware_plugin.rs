//! HardwarePlugin CRD
//!
//! Registers a hardware plugin endpoint and how to authenticate to it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;
use crate::references::SecretReference;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "clcm.openshift.io",
    version = "v1alpha1",
    kind = "HardwarePlugin",
    namespaced,
    status = "HardwarePluginStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HardwarePluginSpec {
    /// Root URL of the plugin API
    pub api_root: String,

    /// Client authentication settings
    #[serde(default)]
    pub auth_client_config: AuthClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthClientConfig {
    /// Authentication method
    #[serde(rename = "type", default)]
    pub auth_type: AuthType,

    /// Secret with `username` and `password` keys (Basic)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth_secret: Option<SecretReference>,

    /// Secret with a `token` key (Bearer)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_secret: Option<SecretReference>,

    /// Secret with `tls.crt` and `tls.key` (MTLS)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret: Option<SecretReference>,

    /// ConfigMap holding `ca-bundle.crt` used to verify the plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
/// Plugin authentication method
pub enum AuthType {
    /// Projected service account token
    #[default]
    ServiceAccount,

    /// Username and password
    Basic,

    /// Static bearer token
    Bearer,

    /// Mutual TLS client identity
    #[serde(rename = "MTLS", alias = "mtls")]
    Mtls,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HardwarePluginStatus {
    /// Registration conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
