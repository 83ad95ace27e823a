//! Condition model shared by the provisioning CRDs
//!
//! ProvisioningRequest conditions are held as a map keyed by [`ConditionType`]
//! in memory and stored as an ordered list. ClusterTemplate, HardwareTemplate
//! and externally owned resources keep plain lists of [`Condition`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Provisioning condition types, declared in phase order
///
/// The derived `Ord` follows declaration order, so a `BTreeMap` keyed by this
/// type iterates phases in the order they are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    Validated,
    HardwareTemplateRendered,
    HardwareProvisioned,
    ClusterInstanceRendered,
    ClusterResourcesCreated,
    ClusterInstanceProcessed,
    ClusterProvisioned,
    ConfigurationApplied,
}

impl ConditionType {
    /// All condition types in phase order
    pub const ALL: [ConditionType; 8] = [
        ConditionType::Validated,
        ConditionType::HardwareTemplateRendered,
        ConditionType::HardwareProvisioned,
        ConditionType::ClusterInstanceRendered,
        ConditionType::ClusterResourcesCreated,
        ConditionType::ClusterInstanceProcessed,
        ConditionType::ClusterProvisioned,
        ConditionType::ConfigurationApplied,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Validated => "Validated",
            ConditionType::HardwareTemplateRendered => "HardwareTemplateRendered",
            ConditionType::HardwareProvisioned => "HardwareProvisioned",
            ConditionType::ClusterInstanceRendered => "ClusterInstanceRendered",
            ConditionType::ClusterResourcesCreated => "ClusterResourcesCreated",
            ConditionType::ClusterInstanceProcessed => "ClusterInstanceProcessed",
            ConditionType::ClusterProvisioned => "ClusterProvisioned",
            ConditionType::ConfigurationApplied => "ConfigurationApplied",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConditionType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown condition type: {}", s))
    }
}

/// Condition status, mirroring the Kubernetes `metav1.ConditionStatus` values
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    #[serde(alias = "true")]
    True,

    #[serde(alias = "false")]
    False,

    #[default]
    #[serde(alias = "unknown")]
    Unknown,
}

/// Reasons set by the orchestrator
///
/// Reasons mirrored from external resources are kept verbatim as strings on
/// [`Condition::reason`], so this enum only names the ones produced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionReason {
    Completed,
    Failed,
    TimedOut,
    InProgress,
    Unknown,
    Missing,
    OutOfDate,
    ClusterNotReady,
}

impl ConditionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionReason::Completed => "Completed",
            ConditionReason::Failed => "Failed",
            ConditionReason::TimedOut => "TimedOut",
            ConditionReason::InProgress => "InProgress",
            ConditionReason::Unknown => "Unknown",
            ConditionReason::Missing => "Missing",
            ConditionReason::OutOfDate => "OutOfDate",
            ConditionReason::ClusterNotReady => "ClusterNotReady",
        }
    }
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single condition record
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False or Unknown
    #[serde(default)]
    pub status: ConditionStatus,

    /// Machine-readable reason for the last transition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Time of the last status change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(type_: impl Into<String>, status: ConditionStatus, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Some(Utc::now()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Whether the reason marks the condition as terminally failed
    pub fn is_failure(&self) -> bool {
        self.status != ConditionStatus::True
            && (self.reason == ConditionReason::Failed.as_str()
                || self.reason == ConditionReason::TimedOut.as_str())
    }
}

/// Conditions of a ProvisioningRequest keyed by type
pub type ConditionMap = BTreeMap<ConditionType, Condition>;

/// Set a condition, preserving `lastTransitionTime` unless the status changes
///
/// Returns true when anything about the stored condition changed.
pub fn set_condition(
    conditions: &mut ConditionMap,
    condition_type: ConditionType,
    status: ConditionStatus,
    reason: impl Into<String>,
    message: impl Into<String>,
) -> bool {
    let reason = reason.into();
    let message = message.into();

    match conditions.get_mut(&condition_type) {
        Some(existing) if existing.status == status => {
            if existing.reason == reason && existing.message == message {
                return false;
            }
            existing.reason = reason;
            existing.message = message;
            true
        }
        _ => {
            conditions.insert(
                condition_type,
                Condition::new(condition_type.as_str(), status, reason, message),
            );
            true
        }
    }
}

/// Find a condition by type in a plain condition list
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == condition_type)
}

/// Whether a condition in a plain list is present and True
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    find_condition(conditions, condition_type).is_some_and(Condition::is_true)
}

/// Set a condition in a plain condition list with the same transition rules as [`set_condition`]
pub fn set_list_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: ConditionStatus,
    reason: impl Into<String>,
    message: impl Into<String>,
) {
    let reason = reason.into();
    let message = message.into();
    match conditions.iter_mut().find(|c| c.type_ == condition_type) {
        Some(existing) if existing.status == status => {
            existing.reason = reason;
            existing.message = message;
        }
        Some(existing) => {
            *existing = Condition::new(condition_type, status, reason, message);
        }
        None => conditions.push(Condition::new(condition_type, status, reason, message)),
    }
}

/// Serde adapter storing a [`ConditionMap`] as a list ordered by phase
///
/// Entries with unknown types are dropped on read.
pub mod condition_list {
    use super::{Condition, ConditionMap, ConditionType};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;

    pub fn serialize<S>(conditions: &ConditionMap, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let list: Vec<&Condition> = conditions.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ConditionMap, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = Option::<Vec<Condition>>::deserialize(deserializer)?.unwrap_or_default();
        Ok(list
            .into_iter()
            .filter_map(|c| ConditionType::from_str(&c.type_).ok().map(|t| (t, c)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_type_order_follows_phases() {
        let mut sorted = ConditionType::ALL.to_vec();
        sorted.reverse();
        sorted.sort();
        assert_eq!(sorted, ConditionType::ALL.to_vec());
        assert!(ConditionType::Validated < ConditionType::ConfigurationApplied);
    }

    #[test]
    fn test_set_condition_keeps_transition_time_on_same_status() {
        let mut conditions = ConditionMap::new();
        assert!(set_condition(
            &mut conditions,
            ConditionType::HardwareProvisioned,
            ConditionStatus::False,
            "InProgress",
            "Hardware provisioning is in progress",
        ));
        let first = conditions[&ConditionType::HardwareProvisioned].last_transition_time;

        assert!(!set_condition(
            &mut conditions,
            ConditionType::HardwareProvisioned,
            ConditionStatus::False,
            "InProgress",
            "Hardware provisioning is in progress",
        ), "identical condition must not report a change");

        assert!(set_condition(
            &mut conditions,
            ConditionType::HardwareProvisioned,
            ConditionStatus::False,
            "TimedOut",
            "Hardware provisioning timed out",
        ));
        let after = &conditions[&ConditionType::HardwareProvisioned];
        assert_eq!(after.reason, "TimedOut");
        assert_eq!(after.last_transition_time, first, "reason change must not move lastTransitionTime");
    }

    #[test]
    fn test_condition_list_drops_unknown_types_and_orders_by_phase() {
        #[derive(Serialize, Deserialize)]
        struct Holder {
            #[serde(default, with = "condition_list")]
            conditions: ConditionMap,
        }

        let raw = serde_json::json!({
            "conditions": [
                {"type": "ClusterProvisioned", "status": "False", "reason": "InProgress", "message": ""},
                {"type": "SomethingElse", "status": "True", "reason": "Completed", "message": ""},
                {"type": "Validated", "status": "True", "reason": "Completed", "message": ""}
            ]
        });
        let holder: Holder = serde_json::from_value(raw).unwrap();
        assert_eq!(holder.conditions.len(), 2);

        let out = serde_json::to_value(&holder).unwrap();
        let types: Vec<&str> = out["conditions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["Validated", "ClusterProvisioned"]);
    }

    #[test]
    fn test_is_failure() {
        let failed = Condition::new("Validated", ConditionStatus::False, "Failed", "bad input");
        let timed_out = Condition::new("ClusterProvisioned", ConditionStatus::False, "TimedOut", "");
        let progressing = Condition::new("ClusterProvisioned", ConditionStatus::False, "InProgress", "");
        assert!(failed.is_failure());
        assert!(timed_out.is_failure());
        assert!(!progressing.is_failure());
    }
}
