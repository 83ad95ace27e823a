//! Deep merge of template documents
//!
//! `src` values override `dst`. Objects merge per key, arrays merge per index
//! with the longer array's tail kept. With `check_type` set, values of
//! different JSON kinds at the same position are an error; otherwise `src`
//! wins.

use serde_json::{Map, Value};
use tracing::info;

use crate::error::{type_name, TemplateError};

fn same_kind(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Merge `src` into `dst`
pub fn deep_merge(dst: &mut Value, src: &Value, check_type: bool) -> Result<(), TemplateError> {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => deep_merge_maps(dst_map, src_map, check_type),
        (Value::Array(dst_items), Value::Array(src_items)) => {
            let merged = deep_merge_slices(dst_items, src_items, check_type)?;
            *dst_items = merged;
            Ok(())
        }
        (dst, src) => {
            if check_type && !same_kind(dst, src) {
                return Err(TemplateError::TypeMismatch(format!(
                    "type mismatch (dst: {}, src: {})",
                    type_name(dst),
                    type_name(src)
                )));
            }
            *dst = src.clone();
            Ok(())
        }
    }
}

/// Merge the entries of `src` into `dst`
pub fn deep_merge_maps(
    dst: &mut Map<String, Value>,
    src: &Map<String, Value>,
    check_type: bool,
) -> Result<(), TemplateError> {
    for (key, src_value) in src {
        let Some(dst_value) = dst.get_mut(key) else {
            dst.insert(key.clone(), src_value.clone());
            continue;
        };

        if !same_kind(dst_value, src_value) {
            if check_type {
                return Err(TemplateError::TypeMismatch(format!(
                    "type mismatch for key: {} (dst: {}, src: {})",
                    key,
                    type_name(dst_value),
                    type_name(src_value)
                )));
            }
            *dst_value = src_value.clone();
            continue;
        }

        match (dst_value, src_value) {
            (Value::Object(dst_map), Value::Object(src_map)) => {
                deep_merge_maps(dst_map, src_map, check_type).map_err(|e| {
                    TemplateError::TypeMismatch(format!("error merging maps for key: {}: {}", key, e))
                })?;
            }
            (Value::Array(dst_items), Value::Array(src_items)) => {
                let merged = deep_merge_slices(dst_items, src_items, check_type).map_err(|e| {
                    TemplateError::TypeMismatch(format!("error merging slices for key: {}: {}", key, e))
                })?;
                *dst_items = merged;
            }
            (dst_value, src_value) => *dst_value = src_value.clone(),
        }
    }
    Ok(())
}

/// Merge two arrays index by index
pub fn deep_merge_slices(dst: &[Value], src: &[Value], check_type: bool) -> Result<Vec<Value>, TemplateError> {
    let len = dst.len().max(src.len());
    let mut result = Vec::with_capacity(len);

    for i in 0..len {
        match (dst.get(i), src.get(i)) {
            (Some(dst_elem), Some(src_elem)) => {
                if !same_kind(dst_elem, src_elem) {
                    if check_type {
                        return Err(TemplateError::TypeMismatch(format!(
                            "type mismatch at index: {} (dst: {}, src: {})",
                            i,
                            type_name(dst_elem),
                            type_name(src_elem)
                        )));
                    }
                    result.push(src_elem.clone());
                    continue;
                }
                match (dst_elem, src_elem) {
                    (Value::Object(dst_map), Value::Object(src_map)) => {
                        let mut merged = dst_map.clone();
                        deep_merge_maps(&mut merged, src_map, check_type).map_err(|e| {
                            TemplateError::TypeMismatch(format!("error merging maps at slice index: {}: {}", i, e))
                        })?;
                        result.push(Value::Object(merged));
                    }
                    _ => result.push(src_elem.clone()),
                }
            }
            (Some(dst_elem), None) => result.push(dst_elem.clone()),
            (None, Some(src_elem)) => result.push(src_elem.clone()),
            (None, None) => {}
        }
    }

    Ok(result)
}

fn is_empty_document(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

/// Merge request input over template defaults
///
/// Both present: input overrides defaults without type checking. Only one
/// present: that one. Neither: an error.
pub fn merge_with_defaults(input: Option<&Value>, defaults: Option<&Value>) -> Result<Value, TemplateError> {
    match (is_empty_document(input), is_empty_document(defaults), input, defaults) {
        (false, false, Some(input), Some(defaults)) => {
            let mut merged = defaults.clone();
            deep_merge(&mut merged, input, false).map_err(|e| {
                TemplateError::TypeMismatch(format!(
                    "failed to merge the clusterTemplateInput(src) with the defaults(dst): {}",
                    e
                ))
            })?;
            Ok(merged)
        }
        (false, true, Some(input), _) => Ok(input.clone()),
        (true, false, _, Some(defaults)) => Ok(defaults.clone()),
        _ => Err(TemplateError::InvalidDocument(
            "expected clusterTemplateInput data not provided in either ProvisioningRequest or Configmap".to_string(),
        )),
    }
}

const LABEL_FIELDS: [&str; 2] = ["extraLabels", "extraAnnotations"];

/// Let default labels and annotations win over request input
///
/// For `extraLabels` and `extraAnnotations`, any key present in both the
/// request input and the defaults, under the same resource type, takes the
/// default value. Keys present only in the input are kept. Nodes are
/// processed pairwise up to the shorter node list.
pub fn override_labels_or_annotations(input: &mut Value, defaults: &Value) -> Result<(), TemplateError> {
    let (Some(input_map), Some(defaults_map)) = (input.as_object_mut(), defaults.as_object()) else {
        return Ok(());
    };

    for field in LABEL_FIELDS {
        let (Some(dst_value), Some(src_value)) = (input_map.get_mut(field), defaults_map.get(field)) else {
            continue;
        };
        let mismatch = |dst: &Value| {
            TemplateError::TypeMismatch(format!(
                "type mismatch for field {}: (from ProvisioningRequest: {}, from default Configmap: {})",
                field,
                type_name(dst),
                type_name(src_value)
            ))
        };
        let Some(src_map) = src_value.as_object() else {
            return Err(mismatch(dst_value));
        };
        if !dst_value.is_object() {
            return Err(mismatch(dst_value));
        }

        for (resource_type, src_fields) in src_map {
            let dst_snapshot = dst_value.clone();
            let Some(dst_fields) = dst_value.get_mut(resource_type.as_str()) else {
                continue;
            };
            let (Some(dst_fields), Some(src_fields)) = (dst_fields.as_object_mut(), src_fields.as_object()) else {
                return Err(mismatch(&dst_snapshot));
            };
            for (key, default_value) in src_fields {
                if let Some(existing) = dst_fields.get_mut(key) {
                    info!(
                        "{}.{}.{} found in both default configmap and clusterInstanceInput, using the default value {}",
                        field, resource_type, key, default_value
                    );
                    *existing = default_value.clone();
                }
            }
        }
    }

    if let (Some(Value::Array(dst_nodes)), Some(Value::Array(src_nodes))) =
        (input_map.get_mut("nodes"), defaults_map.get("nodes"))
    {
        for (dst_node, src_node) in dst_nodes.iter_mut().zip(src_nodes.iter()) {
            override_labels_or_annotations(dst_node, src_node)
                .map_err(|e| TemplateError::TypeMismatch(format!("type mismatch for nodes: {}", e)))?;
        }
    }

    Ok(())
}

/// Defaults separated by whether the schema exposes them
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SplitDefaults {
    /// Values the request may override (present in the schema properties)
    pub editable: Value,
    /// Values the request cannot change
    pub immutable: Value,
}

/// Separate defaults into editable and immutable parts using schema `properties`
pub fn split_defaults(defaults: &Map<String, Value>, schema_properties: &Map<String, Value>) -> Result<SplitDefaults, TemplateError> {
    let (editable, immutable) = split_map(defaults, schema_properties)?;
    Ok(SplitDefaults {
        editable: Value::Object(editable),
        immutable: Value::Object(immutable),
    })
}

fn split_map(
    defaults: &Map<String, Value>,
    schema: &Map<String, Value>,
) -> Result<(Map<String, Value>, Map<String, Value>), TemplateError> {
    let mut editable = Map::new();
    let mut immutable = Map::new();

    for (key, default_value) in defaults {
        let Some(schema_value) = schema.get(key) else {
            immutable.insert(key.clone(), default_value.clone());
            continue;
        };

        match default_value {
            Value::Object(nested) => {
                let Some(nested_schema) = schema_value.get("properties").and_then(Value::as_object) else {
                    editable.insert(key.clone(), default_value.clone());
                    continue;
                };
                let (e, i) = split_map(nested, nested_schema)?;
                if !e.is_empty() {
                    editable.insert(key.clone(), Value::Object(e));
                }
                if !i.is_empty() {
                    immutable.insert(key.clone(), Value::Object(i));
                }
            }
            Value::Array(items) => {
                let items_schema = schema_value.get("items").ok_or_else(|| {
                    TemplateError::Schema("array type schema is missing its expected \"items\" component".to_string())
                })?;
                let item_properties = items_schema
                    .get("properties")
                    .and_then(Value::as_object)
                    .or_else(|| items_schema.as_object());
                let (e, i) = split_slice(items, item_properties)?;
                if !e.is_empty() {
                    editable.insert(key.clone(), Value::Array(e));
                }
                if !i.is_empty() {
                    immutable.insert(key.clone(), Value::Array(i));
                }
            }
            _ => {
                editable.insert(key.clone(), default_value.clone());
            }
        }
    }

    Ok((editable, immutable))
}

fn split_slice(
    items: &[Value],
    schema: Option<&Map<String, Value>>,
) -> Result<(Vec<Value>, Vec<Value>), TemplateError> {
    let empty = Map::new();
    let schema = schema.unwrap_or(&empty);
    let mut editable = Vec::new();
    let mut immutable = Vec::new();

    for item in items {
        match item {
            Value::Object(nested) => {
                let (e, i) = split_map(nested, schema)?;
                if !e.is_empty() {
                    editable.push(Value::Object(e));
                }
                if !i.is_empty() {
                    immutable.push(Value::Object(i));
                }
            }
            other => editable.push(other.clone()),
        }
    }

    Ok((editable, immutable))
}
