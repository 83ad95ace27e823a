//! O-Cloud provisioning CRD definitions
//!
//! Kubernetes Custom Resource Definitions for the provisioning controller.

pub mod conditions;
pub mod schema;
pub mod references;
pub mod provisioning_request;
pub mod cluster_template;
pub mod hardware_template;
pub mod hardware_plugin;

pub use conditions::*;
pub use references::*;
pub use provisioning_request::*;
pub use cluster_template::*;
pub use hardware_template::*;
pub use hardware_plugin::*;
