//! Hardware Plugin Provisioning API Client
//!
//! A client for the hardware plugin provisioning API used to allocate and
//! configure bare-metal nodes for O-Cloud clusters, plus the state machine
//! that turns a plugin-reported status into the next orchestration action.
//!
//! # Example
//!
//! ```no_run
//! use hwplugin_client::{
//!     ClientAuth, ClientOptions, HardwarePluginClient, HardwarePluginClientTrait,
//!     NodeAllocationRequest,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HardwarePluginClient::new(
//!     "metal3-hwplugin",
//!     "https://metal3-hwplugin.hwplugins:8443",
//!     ClientOptions {
//!         auth: ClientAuth::Bearer("token".to_string()),
//!         ..ClientOptions::default()
//!     },
//! )?;
//!
//! let id = client
//!     .create_node_allocation_request(&NodeAllocationRequest {
//!         cluster_id: "cluster-1".to_string(),
//!         boot_interface_label: "bootable-interface".to_string(),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! if let Some(request) = client.get_node_allocation_request(&id).await? {
//!     println!("conditions: {:?}", request.conditions());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Retry Logic**: conflicts, 5xx responses and connection failures are
//!   retried with a fixed backoff
//! - **Problem Details**: RFC 7807 error bodies are surfaced in error messages
//! - **test-util**: in-memory `MockHardwarePluginClient`

pub mod client;
pub mod common;
pub mod error;
pub mod fsm;
pub mod models;
#[path = "trait.rs"]
pub mod plugin_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{ClientOptions, HardwarePluginClient, TlsOptions};
pub use common::{ClientAuth, HttpClient, RetryPolicy};
pub use error::HwPluginError;
pub use fsm::{determine_action, NodeAllocationRequestAction};
pub use models::*;
pub use plugin_trait::HardwarePluginClientTrait;
#[cfg(feature = "test-util")]
pub use mock::MockHardwarePluginClient;
