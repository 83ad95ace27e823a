//! Template parameter schemas
//!
//! Helpers that slice, tighten and apply the JSON Schema carried by a
//! ClusterTemplate to the `templateParameters` of a request.

use jsonschema::error::{TypeKind, ValidationErrorKind};
use serde_json::Value;
use tracing::debug;

use crate::error::{type_name, TemplateError};

/// Name of the cluster the request provisions
pub const NODE_CLUSTER_NAME: &str = "nodeClusterName";
/// O-Cloud site the cluster belongs to
pub const OCLOUD_SITE_ID: &str = "oCloudSiteId";
/// Parameters merged with the cluster-instance defaults
pub const CLUSTER_INSTANCE_PARAMETERS: &str = "clusterInstanceParameters";
/// Parameters merged with the policy-template defaults
pub const POLICY_TEMPLATE_PARAMETERS: &str = "policyTemplateParameters";

/// Parameters every template schema must declare
pub const REQUIRED_TEMPLATE_PARAMETERS: [&str; 4] = [
    NODE_CLUSTER_NAME,
    OCLOUD_SITE_ID,
    CLUSTER_INSTANCE_PARAMETERS,
    POLICY_TEMPLATE_PARAMETERS,
];

/// Return `properties.<key>` of a schema
pub fn extract_sub_schema(schema: &Value, key: &str) -> Result<Value, TemplateError> {
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| TemplateError::Schema("properties not found".to_string()))?;
    properties
        .get(key)
        .cloned()
        .ok_or_else(|| TemplateError::Schema(format!("subSchema '{}' does not exist", key)))
}

/// Return the value of `key` from the template parameters
pub fn extract_matching_input(params: &Value, key: &str) -> Result<Value, TemplateError> {
    params
        .get(key)
        .cloned()
        .ok_or_else(|| TemplateError::MissingField(format!("{} does not exist", key)))
}

/// Names listed under the schema's top-level `required`
pub fn extract_schema_required(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Forbid properties a schema does not declare
///
/// Every node with `properties` gets `additionalProperties: false` unless it
/// already sets `additionalProperties`.
pub fn disallow_unknown_fields(schema: &mut Value) {
    let Some(node) = schema.as_object_mut() else {
        return;
    };

    if node.contains_key("properties") && !node.contains_key("additionalProperties") {
        node.insert("additionalProperties".to_string(), Value::Bool(false));
    }
    if let Some(Value::Object(properties)) = node.get_mut("properties") {
        for property in properties.values_mut() {
            disallow_unknown_fields(property);
        }
    }
    if let Some(items) = node.get_mut("items") {
        disallow_unknown_fields(items);
    }
}

/// Strip `required` from a schema and all nested property and item schemas
pub fn remove_required(schema: &mut Value) {
    let Some(node) = schema.as_object_mut() else {
        return;
    };

    node.remove("required");
    if let Some(Value::Object(properties)) = node.get_mut("properties") {
        for property in properties.values_mut() {
            remove_required(property);
        }
    }
    if let Some(items) = node.get_mut("items") {
        remove_required(items);
    }
}

/// Validate `input` against `schema`
///
/// All violations are reported in one error, joined with `"; "`.
pub fn validate(schema: &Value, input: &Value) -> Result<(), TemplateError> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| TemplateError::Schema(format!("failed to compile schema: {}", e)))?;

    let messages: Vec<String> = validator
        .iter_errors(input)
        .map(|error| {
            let path = dotted_path(&error.instance_path.to_string());
            let description = match &error.kind {
                ValidationErrorKind::Required { property } => {
                    format!("{} is required", property.as_str().map_or_else(|| property.to_string(), str::to_string))
                }
                ValidationErrorKind::AdditionalProperties { unexpected } => unexpected
                    .iter()
                    .map(|p| format!("Additional property {} is not allowed", p))
                    .collect::<Vec<_>>()
                    .join(", "),
                ValidationErrorKind::Type { kind: TypeKind::Single(expected) } => format!(
                    "Invalid type. Expected: {}, given: {}",
                    expected,
                    type_name(&error.instance)
                ),
                _ => error.to_string(),
            };
            format!("{}: {}", path, description)
        })
        .collect();

    if messages.is_empty() {
        return Ok(());
    }
    debug!("Schema validation produced {} error(s)", messages.len());
    Err(TemplateError::InvalidInput(format!("invalid input: {}", messages.join("; "))))
}

/// Convert a JSON pointer such as `/nodes/0/role` to `nodes.0.role`
fn dotted_path(pointer: &str) -> String {
    let trimmed = pointer.trim_start_matches('/');
    if trimmed.is_empty() {
        return "(root)".to_string();
    }
    trimmed
        .split('/')
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect::<Vec<_>>()
        .join(".")
}

/// Validate the top-level `templateParameters` of a request
///
/// The sub-parameter schemas lose their `properties` first so that only the
/// top level is checked here; the sub-parameters are validated separately
/// after merging with defaults.
pub fn validate_template_parameters(schema: &Value, params: &Value, template_id: &str) -> Result<(), TemplateError> {
    let mut schema = schema.clone();
    {
        let properties = schema
            .get_mut("properties")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                TemplateError::Schema(format!(
                    "missing keyword 'properties' in the schema from ClusterTemplate ({})",
                    template_id
                ))
            })?;

        for key in [CLUSTER_INSTANCE_PARAMETERS, POLICY_TEMPLATE_PARAMETERS] {
            let sub_schema = properties.get_mut(key).and_then(Value::as_object_mut).ok_or_else(|| {
                TemplateError::Schema(format!(
                    "missing required property '{}' in the schema from ClusterTemplate ({})",
                    key, template_id
                ))
            })?;
            sub_schema.remove("properties");
        }
    }

    validate(&schema, params).map_err(|e| {
        TemplateError::InvalidInput(format!(
            "the provided templateParameters does not match the schema from ClusterTemplate ({}): {}",
            template_id, e
        ))
    })
}

/// Check that a template schema declares every required parameter
pub fn validate_schema_structure(schema: &Value) -> Result<(), TemplateError> {
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| TemplateError::Schema("missing keyword 'properties' in the schema".to_string()))?;

    let missing: Vec<&str> = REQUIRED_TEMPLATE_PARAMETERS
        .iter()
        .copied()
        .filter(|key| !properties.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(TemplateError::Schema(format!(
            "missing required properties in the schema: {}",
            missing.join(", ")
        )));
    }

    jsonschema::validator_for(schema)
        .map(|_| ())
        .map_err(|e| TemplateError::Schema(format!("failed to compile schema: {}", e)))
}

/// Parse a YAML document from a ConfigMap key into a JSON object
pub fn parse_yaml_defaults(data: &str, key: &str, configmap: &str) -> Result<Value, TemplateError> {
    let invalid = |detail: String| {
        TemplateError::Yaml(format!(
            "the value of key {} from ConfigMap {} is not in a valid YAML string: {}",
            key, configmap, detail
        ))
    };
    let value: Value = serde_yaml::from_str(data).map_err(|e| invalid(e.to_string()))?;
    if !value.is_object() {
        return Err(invalid(format!("expected a map, got {}", type_name(&value))));
    }
    Ok(value)
}
