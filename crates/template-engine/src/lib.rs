//! Template engine for cluster provisioning
//!
//! Operates on [`serde_json::Value`] documents:
//!
//! - [`schema`]: slicing, tightening and applying template parameter schemas
//! - [`merge`]: deep merge of request input with template defaults
//! - [`render`]: required-field checks, hardware node configuration and the
//!   ClusterInstance document
//! - [`diff`]: structural diff and change classification

pub mod diff;
pub mod error;
pub mod merge;
pub mod render;
pub mod schema;

pub use diff::{classify, diff, find_immutable_field_updates, Change, ChangeClass, ChangeType};
pub use error::{type_name, TemplateError};
pub use merge::{
    deep_merge, deep_merge_maps, deep_merge_slices, merge_with_defaults, override_labels_or_annotations,
    split_defaults, SplitDefaults,
};
pub use render::{
    apply_node_configuration, assign_mac_addresses, boot_mac_address, build_cluster_instance,
    generate_bmc_secret_name, prepare_cluster_instance_input, prepare_policy_template_input,
    remove_interface_labels, validate_array_type, validate_default_interfaces, validate_map_type,
    validate_non_empty, validate_required_fields, HardwareInterface, HardwareNode, NodeAssignment,
};
pub use schema::{
    disallow_unknown_fields, extract_matching_input, extract_schema_required, extract_sub_schema,
    parse_yaml_defaults, remove_required, validate, validate_schema_structure, validate_template_parameters,
};
