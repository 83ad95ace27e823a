//! Node-allocation state machine
//!
//! The action to take for a NodeAllocationRequest is derived from the status
//! the plugin reports on every poll. Nothing here is persisted.

use crate::models::{Condition, CONDITION_PROVISIONED, REASON_FAILED};

/// What the orchestrator should do with a NodeAllocationRequest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAllocationRequestAction {
    /// No status yet; the request must be created
    Create,
    /// Provisioning is underway; keep polling
    Processing,
    /// Provisioned for an older generation; re-apply the spec
    SpecChanged,
    /// Nothing to do (provisioned and current, or terminally failed)
    Noop,
}

/// Determine the next action from the plugin-reported conditions
///
/// `generation` is the current ProvisioningRequest generation and
/// `observed_generation` the config transaction id the plugin last observed.
pub fn determine_action(
    conditions: &[Condition],
    generation: i64,
    observed_generation: Option<i64>,
) -> NodeAllocationRequestAction {
    if conditions.is_empty() {
        return NodeAllocationRequestAction::Create;
    }

    let Some(provisioned) = conditions.iter().find(|c| c.type_ == CONDITION_PROVISIONED) else {
        return NodeAllocationRequestAction::Processing;
    };

    if provisioned.is_true() {
        if observed_generation == Some(generation) {
            NodeAllocationRequestAction::Noop
        } else {
            NodeAllocationRequestAction::SpecChanged
        }
    } else if provisioned.reason == REASON_FAILED {
        NodeAllocationRequestAction::Noop
    } else {
        NodeAllocationRequestAction::Processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioned(status: &str, reason: &str) -> Condition {
        Condition {
            type_: CONDITION_PROVISIONED.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: String::new(),
            last_transition_time: None,
        }
    }

    #[test]
    fn test_no_conditions_creates() {
        assert_eq!(determine_action(&[], 1, None), NodeAllocationRequestAction::Create);
    }

    #[test]
    fn test_in_progress_keeps_polling() {
        let conditions = vec![provisioned("False", "InProgress")];
        assert_eq!(determine_action(&conditions, 1, None), NodeAllocationRequestAction::Processing);

        let configured_only = vec![Condition {
            type_: "Configured".to_string(),
            status: "False".to_string(),
            ..Default::default()
        }];
        assert_eq!(determine_action(&configured_only, 1, None), NodeAllocationRequestAction::Processing);
    }

    #[test]
    fn test_provisioned_for_current_generation_is_noop() {
        let conditions = vec![provisioned("True", "Completed")];
        assert_eq!(determine_action(&conditions, 3, Some(3)), NodeAllocationRequestAction::Noop);
    }

    #[test]
    fn test_provisioned_for_older_generation_is_spec_changed() {
        let conditions = vec![provisioned("True", "Completed")];
        assert_eq!(determine_action(&conditions, 4, Some(3)), NodeAllocationRequestAction::SpecChanged);
        assert_eq!(determine_action(&conditions, 4, None), NodeAllocationRequestAction::SpecChanged);
    }

    #[test]
    fn test_failed_is_terminal() {
        let conditions = vec![provisioned("False", "Failed")];
        assert_eq!(determine_action(&conditions, 2, Some(1)), NodeAllocationRequestAction::Noop);
    }
}
