//! Hardware plugin clients built from HardwarePlugin resources

use std::sync::Arc;

use async_trait::async_trait;
use crds::{AuthType, HardwarePlugin, SecretReference};
use hwplugin_client::{ClientAuth, ClientOptions, HardwarePluginClient, HardwarePluginClientTrait, TlsOptions};
use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

use crate::config::Config;
use crate::error::ControllerError;
use crate::store::ProvisioningStore;

/// Token mounted into the controller pod
const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// ConfigMap key holding the CA bundle of a plugin
pub const CA_BUNDLE_KEY: &str = "ca-bundle.crt";

/// Resolves a HardwarePlugin name to a client for its API
#[async_trait]
pub trait PluginClientFactory: Send + Sync {
    async fn client_for(&self, plugin_ref: &str) -> Result<Arc<dyn HardwarePluginClientTrait>, ControllerError>;
}

/// Builds authenticated clients from HardwarePlugin resources and their secrets
pub struct KubePluginClients {
    store: Arc<dyn ProvisioningStore>,
    config: Config,
}

impl KubePluginClients {
    pub fn new(store: Arc<dyn ProvisioningStore>, config: Config) -> Self {
        Self { store, config }
    }

    /// Client options for a plugin: credentials, CA bundle, retry and timeout
    pub async fn client_options(&self, plugin: &HardwarePlugin) -> Result<ClientOptions, ControllerError> {
        let name = plugin.metadata.name.as_deref().unwrap_or_default();
        let namespace = plugin
            .metadata
            .namespace
            .as_deref()
            .unwrap_or(&self.config.controller_namespace);
        let auth_config = &plugin.spec.auth_client_config;

        let mut tls = TlsOptions::default();
        let auth = match auth_config.auth_type {
            AuthType::ServiceAccount => {
                let token = tokio::fs::read_to_string(SERVICE_ACCOUNT_TOKEN_PATH).await.map_err(|e| {
                    ControllerError::InvalidConfig(format!("failed to read service account token: {}", e))
                })?;
                ClientAuth::Bearer(token.trim().to_string())
            }
            AuthType::Basic => {
                let secret = self
                    .required_secret(name, namespace, auth_config.basic_auth_secret.as_ref(), "basicAuthSecret")
                    .await?;
                ClientAuth::Basic {
                    username: secret_string(&secret, "username")?,
                    password: secret_string(&secret, "password")?,
                }
            }
            AuthType::Bearer => {
                let secret = self
                    .required_secret(name, namespace, auth_config.bearer_token_secret.as_ref(), "bearerTokenSecret")
                    .await?;
                ClientAuth::Bearer(secret_string(&secret, "token")?)
            }
            AuthType::Mtls => {
                let secret = self
                    .required_secret(name, namespace, auth_config.tls_secret.as_ref(), "tlsSecret")
                    .await?;
                let mut identity = secret_bytes(&secret, "tls.crt")?;
                if !identity.ends_with(b"\n") {
                    identity.push(b'\n');
                }
                identity.extend(secret_bytes(&secret, "tls.key")?);
                tls.identity_pem = Some(identity);
                ClientAuth::None
            }
        };

        if let Some(ca_bundle_name) = auth_config.ca_bundle_name.as_deref() {
            let config_map = self
                .store
                .get_config_map(namespace, ca_bundle_name)
                .await?
                .ok_or_else(|| {
                    ControllerError::Input(format!(
                        "CA bundle ConfigMap {}/{} of HardwarePlugin {} not found",
                        namespace, ca_bundle_name, name
                    ))
                })?;
            let bundle = config_map
                .data
                .as_ref()
                .and_then(|data| data.get(CA_BUNDLE_KEY))
                .ok_or_else(|| {
                    ControllerError::Input(format!(
                        "ConfigMap {}/{} does not contain key {}",
                        namespace, ca_bundle_name, CA_BUNDLE_KEY
                    ))
                })?;
            tls.ca_bundle = Some(bundle.as_bytes().to_vec());
        }

        Ok(ClientOptions {
            auth,
            tls,
            retry: self.config.hwplugin_retry,
            timeout: self.config.hwplugin_timeout,
        })
    }

    async fn required_secret(
        &self,
        plugin: &str,
        namespace: &str,
        reference: Option<&SecretReference>,
        field: &str,
    ) -> Result<Secret, ControllerError> {
        let reference = reference.ok_or_else(|| {
            ControllerError::Input(format!("HardwarePlugin {} is missing authClientConfig.{}", plugin, field))
        })?;
        let secret_namespace = reference.namespace_or(namespace);
        self.store
            .get_secret(secret_namespace, &reference.name)
            .await?
            .ok_or_else(|| {
                ControllerError::Input(format!(
                    "secret {}/{} referenced by HardwarePlugin {} not found",
                    secret_namespace, reference.name, plugin
                ))
            })
    }
}

#[async_trait]
impl PluginClientFactory for KubePluginClients {
    async fn client_for(&self, plugin_ref: &str) -> Result<Arc<dyn HardwarePluginClientTrait>, ControllerError> {
        let plugin = self.store.get_hardware_plugin(plugin_ref).await?.ok_or_else(|| {
            ControllerError::Input(format!(
                "HardwarePlugin {} not found in namespace {}",
                plugin_ref, self.config.controller_namespace
            ))
        })?;
        let options = self.client_options(&plugin).await?;
        debug!("Building client for HardwarePlugin {} at {}", plugin_ref, plugin.spec.api_root);
        let client = HardwarePluginClient::new(plugin_ref, &plugin.spec.api_root, options)?;
        Ok(Arc::new(client))
    }
}

fn secret_bytes(secret: &Secret, key: &str) -> Result<Vec<u8>, ControllerError> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| value.0.clone())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ControllerError::Input(format!(
                "secret {} is missing key {}",
                secret.metadata.name.as_deref().unwrap_or_default(),
                key
            ))
        })
}

fn secret_string(secret: &Secret, key: &str) -> Result<String, ControllerError> {
    let bytes = secret_bytes(secret, key)?;
    String::from_utf8(bytes).map(|s| s.trim().to_string()).map_err(|e| {
        ControllerError::Input(format!(
            "secret {} key {} is not valid UTF-8: {}",
            secret.metadata.name.as_deref().unwrap_or_default(),
            key,
            e
        ))
    })
}
