//! Controller configuration
//!
//! Built once at startup from environment variables and passed by reference.

use std::net::SocketAddr;
use std::time::Duration;

use hwplugin_client::RetryPolicy;

use crate::error::ControllerError;

const DEFAULT_CONTROLLER_NAMESPACE: &str = "oran-o2ims";
const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Runtime configuration of the provisioning controller
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace to watch for ClusterTemplates; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Namespace holding HardwareTemplates, HardwarePlugins and their secrets
    pub controller_namespace: String,
    /// Namespace in which hardware plugins store BMC credential secrets
    pub hwplugin_namespace: String,
    /// Retry policy for hardware plugin calls
    pub hwplugin_retry: RetryPolicy,
    /// Request timeout for hardware plugin calls
    pub hwplugin_timeout: Duration,
    /// Bind address of the health and metrics server
    pub metrics_bind_address: SocketAddr,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let controller_namespace =
            non_empty("CONTROLLER_NAMESPACE").unwrap_or_else(|| DEFAULT_CONTROLLER_NAMESPACE.to_string());
        let hwplugin_namespace = non_empty("HWPLUGIN_NAMESPACE").unwrap_or_else(|| controller_namespace.clone());

        let defaults = RetryPolicy::default();
        let max_attempts = match non_empty("HWPLUGIN_MAX_RETRIES") {
            Some(v) => v.parse::<u32>().map_err(|e| {
                ControllerError::InvalidConfig(format!("HWPLUGIN_MAX_RETRIES must be a positive integer: {}", e))
            })?,
            None => defaults.max_attempts,
        };
        if max_attempts == 0 {
            return Err(ControllerError::InvalidConfig(
                "HWPLUGIN_MAX_RETRIES must be at least 1".to_string(),
            ));
        }
        let delay = match non_empty("HWPLUGIN_RETRY_DELAY_MS") {
            Some(v) => Duration::from_millis(v.parse::<u64>().map_err(|e| {
                ControllerError::InvalidConfig(format!("HWPLUGIN_RETRY_DELAY_MS must be an integer: {}", e))
            })?),
            None => defaults.delay,
        };
        let hwplugin_timeout = match non_empty("HWPLUGIN_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(v.parse::<u64>().map_err(|e| {
                ControllerError::InvalidConfig(format!("HWPLUGIN_TIMEOUT_SECS must be an integer: {}", e))
            })?),
            None => Duration::from_secs(30),
        };

        let bind = non_empty("METRICS_BIND_ADDRESS").unwrap_or_else(|| DEFAULT_METRICS_BIND_ADDRESS.to_string());
        let metrics_bind_address = bind.parse::<SocketAddr>().map_err(|e| {
            ControllerError::InvalidConfig(format!("METRICS_BIND_ADDRESS '{}' is not a valid address: {}", bind, e))
        })?;

        Ok(Self {
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            controller_namespace,
            hwplugin_namespace,
            hwplugin_retry: RetryPolicy::new(max_attempts, delay),
            hwplugin_timeout,
            metrics_bind_address,
        })
    }
}
