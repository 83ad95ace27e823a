//! Per-phase timeouts
//!
//! Defaults are overridden by the HardwareTemplate and by keys of the
//! template defaults ConfigMaps. Elapsed time is measured from start times
//! persisted on the request status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use crds::HardwareTemplate;
use k8s_openapi::api::core::v1::ConfigMap;

use crate::duration::parse_duration;
use crate::error::ControllerError;

pub const DEFAULT_HARDWARE_PROVISIONING_TIMEOUT: Duration = Duration::from_secs(90 * 60);
pub const DEFAULT_CLUSTER_INSTALLATION_TIMEOUT: Duration = Duration::from_secs(90 * 60);
pub const DEFAULT_CLUSTER_CONFIGURATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Key of the cluster-instance defaults ConfigMap
pub const CLUSTER_INSTALLATION_TIMEOUT_KEY: &str = "clusterInstallationTimeout";
/// Key of the policy-template defaults ConfigMap
pub const CLUSTER_CONFIGURATION_TIMEOUT_KEY: &str = "clusterConfigurationTimeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub hardware_provisioning: Duration,
    pub cluster_installation: Duration,
    pub cluster_configuration: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            hardware_provisioning: DEFAULT_HARDWARE_PROVISIONING_TIMEOUT,
            cluster_installation: DEFAULT_CLUSTER_INSTALLATION_TIMEOUT,
            cluster_configuration: DEFAULT_CLUSTER_CONFIGURATION_TIMEOUT,
        }
    }
}

/// Duration stored under `key` of a ConfigMap, or `default` when the key is absent
pub fn timeout_from_config_map(config_map: &ConfigMap, key: &str, default: Duration) -> Result<Duration, ControllerError> {
    let Some(value) = config_map.data.as_ref().and_then(|data| data.get(key)) else {
        return Ok(default);
    };
    parse_duration(value).map_err(|e| {
        ControllerError::Input(format!(
            "the value of key {} from ConfigMap {} is not a valid duration string: {}",
            key,
            config_map.metadata.name.as_deref().unwrap_or_default(),
            e
        ))
    })
}

/// Hardware provisioning timeout of a HardwareTemplate
pub fn hardware_provisioning_timeout(template: &HardwareTemplate) -> Result<Duration, ControllerError> {
    match template.spec.hardware_provisioning_timeout.as_deref().filter(|v| !v.is_empty()) {
        None => Ok(DEFAULT_HARDWARE_PROVISIONING_TIMEOUT),
        Some(value) => parse_duration(value).map_err(|e| {
            ControllerError::Input(format!(
                "the value of hardwareProvisioningTimeout from HardwareTemplate {} is not a valid duration string: {}",
                template.metadata.name.as_deref().unwrap_or_default(),
                e
            ))
        }),
    }
}

/// Whether more than `timeout` has elapsed since `start`
pub fn timeout_exceeded(start: DateTime<Utc>, timeout: Duration, now: DateTime<Utc>) -> bool {
    (now - start).to_std().is_ok_and(|elapsed| elapsed > timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(data: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("clusterinstance-defaults-v1".to_string()),
                ..Default::default()
            },
            data: Some(data.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>()),
            ..Default::default()
        }
    }

    #[test]
    fn test_timeout_from_config_map() {
        let cm = config_map(&[(CLUSTER_INSTALLATION_TIMEOUT_KEY, "2h")]);
        assert_eq!(
            timeout_from_config_map(&cm, CLUSTER_INSTALLATION_TIMEOUT_KEY, DEFAULT_CLUSTER_INSTALLATION_TIMEOUT).unwrap(),
            Duration::from_secs(7200)
        );
        assert_eq!(
            timeout_from_config_map(&cm, CLUSTER_CONFIGURATION_TIMEOUT_KEY, DEFAULT_CLUSTER_CONFIGURATION_TIMEOUT).unwrap(),
            DEFAULT_CLUSTER_CONFIGURATION_TIMEOUT
        );
    }

    #[test]
    fn test_invalid_timeout_is_input_error() {
        let cm = config_map(&[(CLUSTER_INSTALLATION_TIMEOUT_KEY, "soon")]);
        let err = timeout_from_config_map(&cm, CLUSTER_INSTALLATION_TIMEOUT_KEY, DEFAULT_CLUSTER_INSTALLATION_TIMEOUT)
            .unwrap_err();
        assert!(err.is_input_error());
        assert!(
            err.to_string().starts_with(
                "the value of key clusterInstallationTimeout from ConfigMap clusterinstance-defaults-v1 is not a valid duration string"
            ),
            "unexpected message: {}",
            err
        );
    }

    #[test]
    fn test_timeout_exceeded() {
        let now = Utc::now();
        let timeout = Duration::from_secs(90 * 60);
        assert!(timeout_exceeded(now - chrono::Duration::minutes(91), timeout, now));
        assert!(!timeout_exceeded(now - chrono::Duration::minutes(89), timeout, now));
        assert!(!timeout_exceeded(now + chrono::Duration::minutes(5), timeout, now), "future start never times out");
    }
}
