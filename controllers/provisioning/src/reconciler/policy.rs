//! ConfigurationApplied phase: the policy-readiness gate
//!
//! Configuration policies are only evaluated once the ManagedCluster is
//! available, accepted by the hub and joined. The outcome is computed by
//! [`evaluate_configuration`] from the policy list alone so it can be tested
//! without a cluster.

use std::time::Duration;

use chrono::{DateTime, Utc};
use crds::{is_condition_true, ClusterDetails, ConditionReason, ConditionStatus, ConditionType, PolicyDetails};
use serde_json::Value;
use tracing::{debug, info};

use super::timeouts::timeout_exceeded;
use super::{Reconciler, RequestState, Requeue};
use crate::clusters::object_conditions;
use crate::error::ControllerError;

pub const COMPLIANT: &str = "Compliant";
pub const REMEDIATION_INFORM: &str = "inform";

/// ManagedCluster conditions required before policies are evaluated
pub const MANAGED_CLUSTER_READY_CONDITIONS: [&str; 3] = [
    "ManagedClusterConditionAvailable",
    "HubAcceptedManagedCluster",
    "ManagedClusterJoined",
];

/// Outcome of one configuration evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationOutcome {
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    pub message: &'static str,
    /// New value of `nonCompliantAt`
    pub non_compliant_at: Option<DateTime<Utc>>,
    pub requeue: Requeue,
}

/// Whether a ManagedCluster may receive configuration
pub fn cluster_is_ready_for_policy_config(managed_cluster: Option<&Value>) -> bool {
    let Some(managed_cluster) = managed_cluster else {
        return false;
    };
    let conditions = object_conditions(managed_cluster);
    MANAGED_CLUSTER_READY_CONDITIONS
        .iter()
        .all(|t| is_condition_true(&conditions, t))
}

/// Compliance details of a Policy object
///
/// Replicated policies are named `<root namespace>.<root name>`.
pub fn policy_details(policy: &Value) -> PolicyDetails {
    let name = policy.pointer("/metadata/name").and_then(Value::as_str).unwrap_or_default();
    let namespace = policy.pointer("/metadata/namespace").and_then(Value::as_str).unwrap_or_default();
    let (policy_namespace, policy_name) = name.split_once('.').unwrap_or((namespace, name));
    PolicyDetails {
        compliant: policy
            .pointer("/status/compliant")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        policy_name: policy_name.to_string(),
        policy_namespace: policy_namespace.to_string(),
        remediation_action: policy
            .pointer("/spec/remediationAction")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

/// Decide the ConfigurationApplied condition from the matched policies
pub fn evaluate_configuration(
    policies: &[PolicyDetails],
    cluster_ready: bool,
    non_compliant_at: Option<DateTime<Utc>>,
    timeout: Duration,
    now: DateTime<Utc>,
) -> ConfigurationOutcome {
    if policies.is_empty() {
        return ConfigurationOutcome {
            status: ConditionStatus::True,
            reason: ConditionReason::Missing,
            message: "No configuration present",
            non_compliant_at: None,
            requeue: Requeue::Done,
        };
    }

    let non_compliant: Vec<&PolicyDetails> = policies.iter().filter(|p| p.compliant != COMPLIANT).collect();
    if non_compliant.is_empty() {
        return ConfigurationOutcome {
            status: ConditionStatus::True,
            reason: ConditionReason::Completed,
            message: "The configuration is up to date",
            non_compliant_at: None,
            requeue: Requeue::Done,
        };
    }

    if !cluster_ready {
        return ConfigurationOutcome {
            status: ConditionStatus::False,
            reason: ConditionReason::ClusterNotReady,
            message: "The Cluster is not yet ready",
            non_compliant_at,
            requeue: Requeue::Long,
        };
    }

    if non_compliant
        .iter()
        .all(|p| p.remediation_action.eq_ignore_ascii_case(REMEDIATION_INFORM))
    {
        return ConfigurationOutcome {
            status: ConditionStatus::False,
            reason: ConditionReason::OutOfDate,
            message: "The configuration is out of date",
            non_compliant_at: None,
            requeue: Requeue::Long,
        };
    }

    let start = non_compliant_at.unwrap_or(now);
    if timeout_exceeded(start, timeout, now) {
        ConfigurationOutcome {
            status: ConditionStatus::False,
            reason: ConditionReason::TimedOut,
            message: "The configuration is still being applied, but it timed out",
            non_compliant_at: Some(start),
            requeue: Requeue::Long,
        }
    } else {
        ConfigurationOutcome {
            status: ConditionStatus::False,
            reason: ConditionReason::InProgress,
            message: "The configuration is still being applied",
            non_compliant_at: Some(start),
            requeue: Requeue::Long,
        }
    }
}

impl Reconciler {
    pub(crate) async fn handle_cluster_configuration(
        &self,
        state: &mut RequestState,
    ) -> Result<Requeue, ControllerError> {
        let context = self.load_context(&state.request).await?;
        let namespace = context.cluster_name.as_str();

        let mut policies: Vec<PolicyDetails> = self
            .clusters
            .list_policies(namespace)
            .await?
            .iter()
            .map(policy_details)
            .collect();
        policies.sort_by(|a, b| {
            (a.policy_namespace.as_str(), a.policy_name.as_str()).cmp(&(b.policy_namespace.as_str(), b.policy_name.as_str()))
        });
        let managed_cluster = self.clusters.get_managed_cluster(namespace).await?;
        let ready = cluster_is_ready_for_policy_config(managed_cluster.as_ref());
        debug!(
            "Cluster {} has {} matched policies, ready for configuration: {}",
            namespace,
            policies.len(),
            ready
        );

        let details = state
            .status
            .extensions
            .cluster_details
            .get_or_insert_with(ClusterDetails::default);
        if details.name.is_empty() {
            details.name = namespace.to_string();
        }
        let outcome = evaluate_configuration(
            &policies,
            ready,
            details.non_compliant_at,
            context.timeouts.cluster_configuration,
            Utc::now(),
        );
        details.non_compliant_at = outcome.non_compliant_at;
        state.status.extensions.policies = policies;

        let changed = state.set(ConditionType::ConfigurationApplied, outcome.status, outcome.reason, outcome.message);
        if changed {
            info!(
                "Configuration of ProvisioningRequest {}: {} ({})",
                state.name(),
                outcome.message,
                outcome.reason
            );
        }
        Ok(outcome.requeue)
    }
}
