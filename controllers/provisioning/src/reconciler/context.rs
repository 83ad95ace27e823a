//! Template inputs of a ProvisioningRequest
//!
//! Every phase recomputes its inputs from the request and the documents its
//! ClusterTemplate references, so re-running a phase always issues the same
//! external calls.

use crds::{ClusterTemplate, HardwareTemplate, ProvisioningRequest};
use k8s_openapi::api::core::v1::ConfigMap;
use serde_json::Value;
use template_engine::schema::{NODE_CLUSTER_NAME, OCLOUD_SITE_ID};
use template_engine::{
    parse_yaml_defaults, prepare_cluster_instance_input, prepare_policy_template_input, validate_template_parameters,
};
use tracing::debug;

use super::timeouts::{
    hardware_provisioning_timeout, timeout_from_config_map, Timeouts, CLUSTER_CONFIGURATION_TIMEOUT_KEY,
    CLUSTER_INSTALLATION_TIMEOUT_KEY, DEFAULT_CLUSTER_CONFIGURATION_TIMEOUT, DEFAULT_CLUSTER_INSTALLATION_TIMEOUT,
};
use super::Reconciler;
use crate::error::ControllerError;

/// ConfigMap key holding the ClusterInstance defaults
pub const CLUSTER_INSTANCE_DEFAULTS_KEY: &str = "clusterinstance-defaults";
/// ConfigMap key holding the policy template defaults
pub const POLICY_TEMPLATE_DEFAULTS_KEY: &str = "policytemplate-defaults";

/// Everything a phase needs from the request and its templates
#[derive(Debug, Clone)]
pub struct TemplateContext {
    /// ClusterTemplate name, `<name>.<version>`
    pub template_id: String,
    /// Namespace of the ClusterTemplate and of the documents it references
    pub template_namespace: String,
    /// `oCloudSiteId` parameter
    pub site_id: String,
    /// Name and namespace of the ClusterInstance
    pub cluster_name: String,
    /// `clusterInstanceParameters` merged with the defaults
    pub cluster_instance_input: Value,
    /// `policyTemplateParameters` merged with the defaults
    pub policy_template_input: Value,
    pub hardware_template: HardwareTemplate,
    pub timeouts: Timeouts,
}

/// Lookup outcome for the ClusterTemplate of a request
#[derive(Debug)]
pub enum TemplateLookup {
    Ready(Box<ClusterTemplate>),
    /// Exists but the current generation has not been validated yet
    Pending,
}

impl Reconciler {
    /// Find the ClusterTemplate backing a request
    ///
    /// A missing or invalid template is an input error.
    pub(crate) async fn lookup_cluster_template(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<TemplateLookup, ControllerError> {
        let template_name = request.cluster_template_ref_name();
        let template = self.store.find_cluster_template(&template_name).await?.ok_or_else(|| {
            ControllerError::Input(format!(
                "failed to get the ClusterTemplate: a valid ClusterTemplate ({}) does not exist in any namespace",
                template_name
            ))
        })?;

        if !template.is_generation_validated() {
            return Ok(TemplateLookup::Pending);
        }
        if !template.is_validated() {
            return Err(ControllerError::Input(format!(
                "failed to get the ClusterTemplate: the ClusterTemplate ({}) is not valid",
                template_name
            )));
        }
        Ok(TemplateLookup::Ready(Box::new(template)))
    }

    /// Build the context of a request whose ClusterTemplate must already be valid
    pub(crate) async fn load_context(&self, request: &ProvisioningRequest) -> Result<TemplateContext, ControllerError> {
        match self.lookup_cluster_template(request).await? {
            TemplateLookup::Ready(template) => self.build_context(request, &template).await,
            TemplateLookup::Pending => Err(ControllerError::Reconciliation(format!(
                "ClusterTemplate {} has not been validated yet",
                request.cluster_template_ref_name()
            ))),
        }
    }

    /// Validate the request parameters against `template` and merge them with its defaults
    pub(crate) async fn build_context(
        &self,
        request: &ProvisioningRequest,
        template: &ClusterTemplate,
    ) -> Result<TemplateContext, ControllerError> {
        let template_id = template.metadata.name.clone().unwrap_or_default();
        let namespace = template.metadata.namespace.clone().unwrap_or_default();
        let schema = &template.spec.template_parameter_schema;
        let params = &request.spec.template_parameters;

        validate_template_parameters(schema, params, &template_id)?;

        let ci_config_map = self
            .required_config_map(&namespace, &template.spec.templates.cluster_instance_defaults)
            .await?;
        let ci_defaults = defaults_from_config_map(&ci_config_map, CLUSTER_INSTANCE_DEFAULTS_KEY)?;
        let cluster_instance_input =
            prepare_cluster_instance_input(schema, params, Some(&ci_defaults), &template_id)?;

        let pt_config_map = self
            .required_config_map(&namespace, &template.spec.templates.policy_template_defaults)
            .await?;
        let pt_defaults = defaults_from_config_map(&pt_config_map, POLICY_TEMPLATE_DEFAULTS_KEY)?;
        let policy_template_input = prepare_policy_template_input(schema, params, Some(&pt_defaults), &template_id)?;

        let hardware_template = self.required_hardware_template(template).await?;
        let timeouts = Timeouts {
            hardware_provisioning: hardware_provisioning_timeout(&hardware_template)?,
            cluster_installation: timeout_from_config_map(
                &ci_config_map,
                CLUSTER_INSTALLATION_TIMEOUT_KEY,
                DEFAULT_CLUSTER_INSTALLATION_TIMEOUT,
            )?,
            cluster_configuration: timeout_from_config_map(
                &pt_config_map,
                CLUSTER_CONFIGURATION_TIMEOUT_KEY,
                DEFAULT_CLUSTER_CONFIGURATION_TIMEOUT,
            )?,
        };

        let node_cluster_name = string_parameter(params, NODE_CLUSTER_NAME)?;
        let site_id = string_parameter(params, OCLOUD_SITE_ID)?;
        let cluster_name = cluster_instance_input
            .get("clusterName")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map_or_else(|| node_cluster_name.clone(), str::to_string);

        debug!(
            "Loaded template context for ProvisioningRequest {} from ClusterTemplate {}",
            request.metadata.name.as_deref().unwrap_or_default(),
            template_id
        );
        Ok(TemplateContext {
            template_id,
            template_namespace: namespace,
            site_id,
            cluster_name,
            cluster_instance_input,
            policy_template_input,
            hardware_template,
            timeouts,
        })
    }

    pub(crate) async fn required_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, ControllerError> {
        self.store
            .get_config_map(namespace, name)
            .await?
            .ok_or_else(|| ControllerError::Input(format!("failed to get ConfigMap {}/{}: not found", namespace, name)))
    }

    pub(crate) async fn required_hardware_template(
        &self,
        template: &ClusterTemplate,
    ) -> Result<HardwareTemplate, ControllerError> {
        let template_id = template.metadata.name.as_deref().unwrap_or_default();
        let name = template
            .spec
            .templates
            .hw_template
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                ControllerError::Input(format!(
                    "ClusterTemplate ({}) does not reference a HardwareTemplate",
                    template_id
                ))
            })?;
        let hardware_template = self.store.get_hardware_template(name).await?.ok_or_else(|| {
            ControllerError::Input(format!(
                "failed to get HardwareTemplate {} in namespace {}: not found",
                name, self.config.controller_namespace
            ))
        })?;
        hardware_template
            .spec
            .validate()
            .map_err(|e| ControllerError::Input(format!("the HardwareTemplate {} is invalid: {}", name, e)))?;
        Ok(hardware_template)
    }
}

/// Parse the YAML document stored under `key` of a defaults ConfigMap
pub fn defaults_from_config_map(config_map: &ConfigMap, key: &str) -> Result<Value, ControllerError> {
    let name = config_map.metadata.name.as_deref().unwrap_or_default();
    let data = config_map
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(|| ControllerError::Input(format!("the ConfigMap '{}' does not contain a field named '{}'", name, key)))?;
    Ok(parse_yaml_defaults(data, key, name)?)
}

fn string_parameter(params: &Value, key: &str) -> Result<String, ControllerError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ControllerError::Input(format!("failed to get {} from templateParameters", key)))
}
