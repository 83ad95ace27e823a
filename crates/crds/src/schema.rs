//! Schema helpers for free-form fields

use schemars::{json_schema, Schema, SchemaGenerator};

/// Schema for an arbitrary JSON object kept verbatim by the API server
pub fn preserve_unknown_fields(_generator: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}
