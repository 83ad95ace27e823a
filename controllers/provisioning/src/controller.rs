//! Main controller implementation.
//!
//! The `Controller` wires the Kubernetes-backed seams into a [`Reconciler`],
//! starts one watcher per CRD plus the health/metrics server, and runs until
//! one of them exits or the process is asked to stop.

use crate::clusters::KubeClusters;
use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::plugins::KubePluginClients;
use crate::reconciler::Reconciler;
use crate::store::{KubeStore, ProvisioningStore};
use crate::watcher::Watcher;
use crds::{ClusterTemplate, ProvisioningRequest};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Main controller for ProvisioningRequest and ClusterTemplate management.
pub struct Controller {
    provisioning_request_watcher: JoinHandle<Result<(), ControllerError>>,
    cluster_template_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Provisioning Controller");

        let kube_client = Client::try_default().await?;

        let provisioning_request_api: Api<ProvisioningRequest> = Api::all(kube_client.clone());
        let cluster_template_api: Api<ClusterTemplate> = match &config.watch_namespace {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };

        let store: Arc<dyn ProvisioningStore> = Arc::new(KubeStore::new(
            kube_client.clone(),
            config.watch_namespace.clone(),
            config.controller_namespace.clone(),
        ));
        let clusters = Arc::new(KubeClusters::new(kube_client));
        let plugins = Arc::new(KubePluginClients::new(store.clone(), config.clone()));
        let metrics = Arc::new(Metrics::new()?);

        let metrics_server = {
            let metrics = metrics.clone();
            let address = config.metrics_bind_address;
            tokio::spawn(async move { metrics::serve(address, metrics).await })
        };

        let reconciler = Arc::new(Reconciler::new(config, store, clusters, plugins, metrics.clone()));
        let watcher_instance = Arc::new(Watcher::new(
            reconciler,
            provisioning_request_api,
            cluster_template_api,
        ));

        let cluster_template_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_cluster_templates().await })
        };

        let provisioning_request_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_provisioning_requests().await })
        };

        metrics.set_ready();

        Ok(Self {
            provisioning_request_watcher,
            cluster_template_watcher,
            metrics_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Provisioning Controller running");

        // Watchers and the metrics server run forever; any exit ends the process
        tokio::select! {
            result = &mut self.provisioning_request_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ProvisioningRequest watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("ProvisioningRequest watcher error: {}", e)))?;
            }
            result = &mut self.cluster_template_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ClusterTemplate watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("ClusterTemplate watcher error: {}", e)))?;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("Metrics server panicked: {}", e)))??;
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, stopping Provisioning Controller");
            }
        }

        Ok(())
    }
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
}
