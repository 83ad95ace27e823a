//! Reconciliation of ProvisioningRequests and ClusterTemplates
//!
//! A ProvisioningRequest moves through eight phases, each gated by a status
//! condition. Every reconciliation performs the work of at most one phase,
//! persists the status and returns when to look again:
//! - `validation`: parameters against the ClusterTemplate
//! - `hardware`: NodeAllocationRequest rendering and provisioning
//! - `cluster_install`: ClusterInstance rendering, resources, apply and installation
//! - `policy`: configuration compliance
//! - `deletion`: teardown behind the finalizer

pub mod cluster_install;
pub mod cluster_template;
pub mod context;
pub mod deletion;
pub mod hardware;
pub mod policy;
pub mod timeouts;
pub mod validation;

#[cfg(test)]
mod cluster_template_test;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crds::{
    set_condition, ConditionReason, ConditionStatus, ConditionType, ProvisioningRequest, ProvisioningRequestStatus,
    PROVISIONING_REQUEST_FINALIZER,
};
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffTracker;
use crate::clusters::ClusterResources;
use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::plugins::PluginClientFactory;
use crate::store::ProvisioningStore;

/// Attempts at a reconciliation that keeps losing status-write races
pub const MAX_CONFLICT_RETRIES: u32 = 5;

/// Label tying created resources to their ProvisioningRequest
pub const PROVISIONING_REQUEST_NAME_LABEL: &str = "provisioningrequest.clcm.openshift.io/name";

/// When to reconcile a resource again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// The next phase is ready to run
    Short,
    /// Waiting on an external system that is making progress
    Medium,
    /// Waiting on configuration to converge
    Long,
    /// Nothing left to do until the resource changes
    Done,
}

impl Requeue {
    pub fn interval(self) -> Option<Duration> {
        match self {
            Requeue::Short => Some(Duration::from_secs(15)),
            Requeue::Medium => Some(Duration::from_secs(30)),
            Requeue::Long => Some(Duration::from_secs(60)),
            Requeue::Done => None,
        }
    }
}

/// Reconciles provisioning resources.
pub struct Reconciler {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn ProvisioningStore>,
    pub(crate) clusters: Arc<dyn ClusterResources>,
    pub(crate) plugins: Arc<dyn PluginClientFactory>,
    pub(crate) metrics: Arc<Metrics>,
    /// Error backoff per `<kind>/<name>`
    backoff: BackoffTracker,
}

/// Working copy of a request during one reconciliation
#[derive(Debug, Clone)]
pub(crate) struct RequestState {
    pub request: ProvisioningRequest,
    pub status: ProvisioningRequestStatus,
}

impl RequestState {
    fn new(request: ProvisioningRequest) -> Self {
        let status = request.status.clone().unwrap_or_default();
        Self { request, status }
    }

    pub fn name(&self) -> &str {
        self.request.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn generation(&self) -> i64 {
        self.request.metadata.generation.unwrap_or(0)
    }

    pub fn set(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: ConditionReason,
        message: impl Into<String>,
    ) -> bool {
        set_condition(&mut self.status.conditions, condition_type, status, reason.as_str(), message)
    }
}

/// Message prefix for an input error surfaced on a phase condition
fn failure_prefix(phase: ConditionType) -> &'static str {
    match phase {
        ConditionType::Validated => "Failed to validate the ProvisioningRequest: ",
        ConditionType::HardwareTemplateRendered => "Failed to render the Hardware template: ",
        ConditionType::HardwareProvisioned => "Failed to provision hardware: ",
        ConditionType::ClusterInstanceRendered => "Failed to render and validate ClusterInstance: ",
        ConditionType::ClusterResourcesCreated => "Failed to apply the required cluster resource: ",
        ConditionType::ClusterInstanceProcessed => "Failed to apply the rendered ClusterInstance: ",
        ConditionType::ClusterProvisioned => "Failed to check the cluster installation: ",
        ConditionType::ConfigurationApplied => "Failed to check the cluster configuration: ",
    }
}

impl Reconciler {
    pub fn new(
        config: Config,
        store: Arc<dyn ProvisioningStore>,
        clusters: Arc<dyn ClusterResources>,
        plugins: Arc<dyn PluginClientFactory>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            store,
            clusters,
            plugins,
            metrics,
            backoff: BackoffTracker::new(),
        }
    }

    /// Delay before retrying a resource whose reconciliation failed
    pub fn error_backoff(&self, kind: &str, name: &str) -> Duration {
        let (delay, errors) = self.backoff.next_delay(&format!("{}/{}", kind, name));
        warn!(
            "Reconciliation of {} {} failed {} time(s) in a row, retrying in {:?}",
            kind, name, errors, delay
        );
        delay
    }

    pub(crate) fn reset_backoff(&self, kind: &str, name: &str) {
        self.backoff.reset(&format!("{}/{}", kind, name));
    }

    /// Reconcile one ProvisioningRequest
    ///
    /// A status write that loses an optimistic-concurrency race reloads the
    /// request and recomputes the step, up to [`MAX_CONFLICT_RETRIES`] times.
    pub async fn reconcile_provisioning_request(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<Requeue, ControllerError> {
        let name = request
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::Reconciliation("ProvisioningRequest has no name".to_string()))?;
        self.metrics.record_reconciliation("ProvisioningRequest");

        let mut current = request.clone();
        let mut attempt = 1;
        loop {
            match self.reconcile_once(current).await {
                Ok(requeue) => {
                    self.reset_backoff("ProvisioningRequest", &name);
                    return Ok(requeue);
                }
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    debug!("Conflict on ProvisioningRequest {} (attempt {}): {}", name, attempt, e);
                    attempt += 1;
                    match self.store.get_provisioning_request(&name).await? {
                        Some(latest) => current = latest,
                        None => return Ok(Requeue::Done),
                    }
                }
                Err(e) => {
                    self.metrics.record_error("ProvisioningRequest", &e);
                    return Err(e);
                }
            }
        }
    }

    async fn reconcile_once(&self, request: ProvisioningRequest) -> Result<Requeue, ControllerError> {
        if request.metadata.deletion_timestamp.is_some() {
            return self.handle_deletion(request).await;
        }

        let finalizers = request.metadata.finalizers.clone().unwrap_or_default();
        if !finalizers.iter().any(|f| f == PROVISIONING_REQUEST_FINALIZER) {
            let mut updated = finalizers;
            updated.push(PROVISIONING_REQUEST_FINALIZER.to_string());
            self.store.set_provisioning_request_finalizers(&request, updated).await?;
            info!(
                "Added finalizer to ProvisioningRequest {}",
                request.metadata.name.as_deref().unwrap_or_default()
            );
            return Ok(Requeue::Short);
        }

        let mut state = RequestState::new(request);
        self.observe_generation(&mut state);

        let requeue = if let Some(failed) = blocking_failure(&state.status) {
            debug!(
                "ProvisioningRequest {} is failed on {}, waiting for a spec change",
                state.name(),
                failed
            );
            Requeue::Done
        } else {
            self.run_next_phase(&mut state).await?
        };

        self.persist(&mut state).await?;
        Ok(requeue)
    }

    /// Reset renderable phases and failed phases after a spec change
    fn observe_generation(&self, state: &mut RequestState) {
        let generation = state.generation();
        match state.status.observed_generation {
            Some(observed) if observed == generation => return,
            Some(observed) => {
                info!(
                    "ProvisioningRequest {} spec changed (generation {} -> {}), re-running rendering phases",
                    state.name(),
                    observed,
                    generation
                );
                let now = Utc::now();
                for condition_type in ConditionType::ALL {
                    let Some(failed) = state.status.condition(condition_type).map(|c| c.is_failure()) else {
                        continue;
                    };
                    let renderable = matches!(
                        condition_type,
                        ConditionType::Validated
                            | ConditionType::HardwareTemplateRendered
                            | ConditionType::ClusterInstanceRendered
                    );
                    if !renderable && !failed {
                        continue;
                    }
                    if failed {
                        restart_timer(&mut state.status, condition_type, now);
                    }
                    info!("Resetting condition {} of ProvisioningRequest {}", condition_type, state.name());
                    state.set(
                        condition_type,
                        ConditionStatus::Unknown,
                        ConditionReason::InProgress,
                        "Re-evaluating after a spec change",
                    );
                }
            }
            None => {}
        }
        state.status.observed_generation = Some(generation);
    }

    async fn run_next_phase(&self, state: &mut RequestState) -> Result<Requeue, ControllerError> {
        // Fulfilled requests keep re-checking policy compliance
        let phase = ConditionType::ALL
            .into_iter()
            .find(|t| !state.status.is_condition_true(*t))
            .unwrap_or(ConditionType::ConfigurationApplied);
        debug!("Running phase {} for ProvisioningRequest {}", phase, state.name());

        let result = match phase {
            ConditionType::Validated => self.handle_validation(state).await,
            ConditionType::HardwareTemplateRendered => self.handle_hardware_template_rendering(state).await,
            ConditionType::HardwareProvisioned => self.handle_hardware_provisioning(state).await,
            ConditionType::ClusterInstanceRendered => self.handle_cluster_instance_rendering(state).await,
            ConditionType::ClusterResourcesCreated => self.handle_cluster_resources(state).await,
            ConditionType::ClusterInstanceProcessed => self.handle_cluster_instance_processing(state).await,
            ConditionType::ClusterProvisioned => self.handle_cluster_provisioning(state).await,
            ConditionType::ConfigurationApplied => self.handle_cluster_configuration(state).await,
        };

        match result {
            Ok(requeue) => Ok(requeue),
            Err(e) if e.is_input_error() => {
                let message = format!("{}{}", failure_prefix(phase), e);
                error!("ProvisioningRequest {}: {}", state.name(), message);
                state.set(phase, ConditionStatus::False, ConditionReason::Failed, message);
                Ok(Requeue::Done)
            }
            Err(e) => {
                error!("Phase {} of ProvisioningRequest {} failed: {}", phase, state.name(), e);
                Err(e)
            }
        }
    }

    /// Derive the provisioning phase and write the status if it changed
    async fn persist(&self, state: &mut RequestState) -> Result<(), ControllerError> {
        let (phase, details) = state.status.derived_phase();
        state.status.set_provisioning_state(phase, details);
        self.metrics.observe_phase(state.name(), phase);
        self.write_status(state).await
    }

    /// Write the working status unless it matches the stored one
    pub(crate) async fn write_status(&self, state: &mut RequestState) -> Result<(), ControllerError> {
        if state.request.status.as_ref() == Some(&state.status) {
            debug!("Status of ProvisioningRequest {} is unchanged", state.name());
            return Ok(());
        }
        let mut updated = state.request.clone();
        updated.status = Some(state.status.clone());
        state.request = self.store.update_provisioning_request_status(&updated).await?;
        Ok(())
    }
}

/// First condition, in phase order, that failed terminally and blocks progress
///
/// A timed-out configuration keeps being evaluated so that late compliance
/// still completes the request.
fn blocking_failure(status: &ProvisioningRequestStatus) -> Option<ConditionType> {
    let first_pending = ConditionType::ALL
        .into_iter()
        .find(|t| !status.is_condition_true(*t))?;
    let condition = status.condition(first_pending)?;
    if !condition.is_failure() {
        return None;
    }
    if first_pending == ConditionType::ConfigurationApplied && condition.reason == ConditionReason::TimedOut.as_str() {
        return None;
    }
    Some(first_pending)
}

/// Restart the timer of a failed phase so it is measured from the retry
fn restart_timer(status: &mut ProvisioningRequestStatus, condition_type: ConditionType, now: chrono::DateTime<Utc>) {
    match condition_type {
        ConditionType::HardwareProvisioned => {
            if let Some(reference) = status.extensions.node_allocation_request_ref.as_mut() {
                if reference.hardware_configuring_check_start.is_some() {
                    reference.hardware_configuring_check_start = Some(now);
                } else {
                    reference.hardware_provisioning_check_start = Some(now);
                }
            }
        }
        ConditionType::ClusterProvisioned => {
            if let Some(details) = status.extensions.cluster_details.as_mut() {
                details.cluster_provision_started_at = None;
            }
        }
        ConditionType::ConfigurationApplied => {
            if let Some(details) = status.extensions.cluster_details.as_mut() {
                details.non_compliant_at = None;
            }
        }
        _ => {}
    }
}
