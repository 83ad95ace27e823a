//! Validated phase

use crds::{ConditionReason, ConditionStatus, ConditionType};
use tracing::info;

use super::context::TemplateLookup;
use super::{Reconciler, RequestState, Requeue};
use crate::error::ControllerError;

impl Reconciler {
    /// Check the request against its ClusterTemplate and the template defaults
    pub(crate) async fn handle_validation(&self, state: &mut RequestState) -> Result<Requeue, ControllerError> {
        let template = match self.lookup_cluster_template(&state.request).await? {
            TemplateLookup::Ready(template) => template,
            TemplateLookup::Pending => {
                let message = format!(
                    "Waiting for ClusterTemplate ({}) to be validated",
                    state.request.cluster_template_ref_name()
                );
                state.set(ConditionType::Validated, ConditionStatus::Unknown, ConditionReason::InProgress, message);
                return Ok(Requeue::Medium);
            }
        };

        let context = self.build_context(&state.request, &template).await?;

        info!(
            "ProvisioningRequest {} validated against ClusterTemplate {}",
            state.name(),
            context.template_id
        );
        state.set(
            ConditionType::Validated,
            ConditionStatus::True,
            ConditionReason::Completed,
            "The provisioning request validation succeeded",
        );
        Ok(Requeue::Short)
    }
}
