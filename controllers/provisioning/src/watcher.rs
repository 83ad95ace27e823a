//! Kubernetes resource watchers.
//!
//! Both watched kinds go through the generic `watch_resource()` helper, which
//! runs a `kube_runtime::Controller` with reconnection, debouncing and
//! per-object serialization of reconciliations.

use crate::error::ControllerError;
use crate::reconciler::{Reconciler, Requeue};
use crds::{ClusterTemplate, ProvisioningRequest};
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{Controller, watcher, controller::{Action, Config as ControllerConfig}};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Map a reconciler outcome to a controller action
fn requeue_action(requeue: Requeue) -> Action {
    requeue.interval().map_or_else(Action::await_change, Action::requeue)
}

/// Generic watcher helper around `kube_runtime::Controller`.
///
/// Failed reconciliations are retried with the reconciler's per-object
/// Fibonacci backoff. The controller never runs two reconciliations of the
/// same object at once.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let name = obj.name_any();
        error!("Reconciliation error for {} {}: {}", resource_name, name, error);
        Action::requeue(ctx.error_backoff(resource_name, &name))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        let resource_name = resource_name.to_string();
        async move {
            debug!("Reconciling {} {}", resource_name, obj.name_any());
            reconcile_fn(ctx, obj).await
        }
    };

    // Debounce batches the status writes of one reconciliation into a single event
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches ProvisioningRequests and ClusterTemplates.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    provisioning_request_api: Api<ProvisioningRequest>,
    cluster_template_api: Api<ClusterTemplate>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        provisioning_request_api: Api<ProvisioningRequest>,
        cluster_template_api: Api<ClusterTemplate>,
    ) -> Self {
        Self {
            reconciler,
            provisioning_request_api,
            cluster_template_api,
        }
    }

    /// Watches ProvisioningRequest resources.
    pub async fn watch_provisioning_requests(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.provisioning_request_api.clone(),
            self.reconciler.clone(),
            |reconciler, request| {
                Box::pin(async move {
                    let requeue = reconciler.reconcile_provisioning_request(&request).await?;
                    Ok(requeue_action(requeue))
                })
            },
            "ProvisioningRequest",
        )
        .await
    }

    /// Watches ClusterTemplate resources.
    pub async fn watch_cluster_templates(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.cluster_template_api.clone(),
            self.reconciler.clone(),
            |reconciler, template| {
                Box::pin(async move {
                    let requeue = reconciler.reconcile_cluster_template(&template).await?;
                    Ok(requeue_action(requeue))
                })
            },
            "ClusterTemplate",
        )
        .await
    }
}
