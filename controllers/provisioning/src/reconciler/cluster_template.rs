//! ClusterTemplate validation
//!
//! A ClusterTemplate is validated once per generation. ProvisioningRequests
//! only use templates whose current generation validated successfully.

use crds::{set_list_condition, ClusterTemplate, ConditionReason, ConditionStatus, CLUSTER_TEMPLATE_VALIDATED};
use serde_json::Value;
use template_engine::schema::{CLUSTER_INSTANCE_PARAMETERS, POLICY_TEMPLATE_PARAMETERS};
use template_engine::{
    extract_sub_schema, remove_required, split_defaults, validate, validate_default_interfaces,
    validate_schema_structure,
};
use tracing::{debug, info, warn};

use super::context::{defaults_from_config_map, CLUSTER_INSTANCE_DEFAULTS_KEY, POLICY_TEMPLATE_DEFAULTS_KEY};
use super::timeouts::{
    hardware_provisioning_timeout, timeout_from_config_map, CLUSTER_CONFIGURATION_TIMEOUT_KEY, CLUSTER_INSTALLATION_TIMEOUT_KEY,
    DEFAULT_CLUSTER_CONFIGURATION_TIMEOUT, DEFAULT_CLUSTER_INSTALLATION_TIMEOUT,
};
use super::{Reconciler, Requeue};
use crate::error::ControllerError;

/// Check editable defaults against the parameter sub-schema, ignoring `required`
fn validate_editable_defaults(schema: &Value, key: &str, defaults: &Value) -> Result<(), ControllerError> {
    let mut sub_schema = extract_sub_schema(schema, key)?;
    let (Some(defaults), Some(properties)) = (
        defaults.as_object(),
        sub_schema.get("properties").and_then(Value::as_object),
    ) else {
        return Ok(());
    };
    let split = split_defaults(defaults, properties)?;
    remove_required(&mut sub_schema);
    validate(&sub_schema, &split.editable).map_err(|e| {
        ControllerError::Input(format!("the editable defaults of {} do not match the schema: {}", key, e))
    })
}

impl Reconciler {
    /// Validate a ClusterTemplate and record the outcome on its status
    pub async fn reconcile_cluster_template(&self, template: &ClusterTemplate) -> Result<Requeue, ControllerError> {
        let name = template.metadata.name.clone().unwrap_or_default();
        self.metrics.record_reconciliation("ClusterTemplate");
        if template.is_generation_validated() {
            debug!("ClusterTemplate {} generation already validated", name);
            return Ok(Requeue::Done);
        }

        let errors = match self.validate_cluster_template(template).await {
            Ok(errors) => errors,
            Err(e) => {
                self.metrics.record_error("ClusterTemplate", &e);
                return Err(e);
            }
        };

        let mut updated = template.clone();
        let status = updated.status.get_or_insert_with(Default::default);
        if errors.is_empty() {
            info!("ClusterTemplate {} is valid", name);
            set_list_condition(
                &mut status.conditions,
                CLUSTER_TEMPLATE_VALIDATED,
                ConditionStatus::True,
                ConditionReason::Completed.as_str(),
                "The cluster template validation succeeded",
            );
        } else {
            warn!("ClusterTemplate {} is invalid: {}", name, errors.join("; "));
            set_list_condition(
                &mut status.conditions,
                CLUSTER_TEMPLATE_VALIDATED,
                ConditionStatus::False,
                ConditionReason::Failed.as_str(),
                format!("Failed to validate the ClusterTemplate: {}", errors.join("; ")),
            );
        }
        status.observed_generation = template.metadata.generation;
        self.store.update_cluster_template_status(&updated).await?;
        self.reset_backoff("ClusterTemplate", &name);
        Ok(Requeue::Done)
    }

    /// Validation errors of a ClusterTemplate
    ///
    /// Input problems are collected; only transient errors are returned as `Err`.
    pub(crate) async fn validate_cluster_template(&self, template: &ClusterTemplate) -> Result<Vec<String>, ControllerError> {
        let namespace = template.metadata.namespace.clone().unwrap_or_default();
        let schema = &template.spec.template_parameter_schema;
        let mut errors = Vec::new();
        let mut collect = |result: Result<(), ControllerError>| -> Result<(), ControllerError> {
            match result {
                Err(e) if e.is_input_error() => {
                    errors.push(e.to_string());
                    Ok(())
                }
                other => other,
            }
        };

        let schema_result = validate_schema_structure(schema).map_err(ControllerError::from);
        let schema_valid = schema_result.is_ok();
        collect(schema_result)?;

        let ci_result = async {
            let config_map = self
                .required_config_map(&namespace, &template.spec.templates.cluster_instance_defaults)
                .await?;
            let defaults = defaults_from_config_map(&config_map, CLUSTER_INSTANCE_DEFAULTS_KEY)?;
            validate_default_interfaces(&defaults)?;
            timeout_from_config_map(
                &config_map,
                CLUSTER_INSTALLATION_TIMEOUT_KEY,
                DEFAULT_CLUSTER_INSTALLATION_TIMEOUT,
            )?;
            if schema_valid {
                validate_editable_defaults(schema, CLUSTER_INSTANCE_PARAMETERS, &defaults)?;
            }
            Ok::<(), ControllerError>(())
        }
        .await;
        collect(ci_result)?;

        let pt_result = async {
            let config_map = self
                .required_config_map(&namespace, &template.spec.templates.policy_template_defaults)
                .await?;
            let defaults = defaults_from_config_map(&config_map, POLICY_TEMPLATE_DEFAULTS_KEY)?;
            timeout_from_config_map(
                &config_map,
                CLUSTER_CONFIGURATION_TIMEOUT_KEY,
                DEFAULT_CLUSTER_CONFIGURATION_TIMEOUT,
            )?;
            if schema_valid {
                validate_editable_defaults(schema, POLICY_TEMPLATE_PARAMETERS, &defaults)?;
            }
            Ok::<(), ControllerError>(())
        }
        .await;
        collect(pt_result)?;

        let hw_result = async {
            let hardware_template = self.required_hardware_template(template).await?;
            hardware_provisioning_timeout(&hardware_template)?;
            Ok::<(), ControllerError>(())
        }
        .await;
        collect(hw_result)?;

        Ok(errors)
    }
}
