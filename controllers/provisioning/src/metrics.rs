//! Prometheus metrics and the health/metrics HTTP endpoint

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use crds::ProvisioningPhase;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ControllerError;

/// Controller metrics
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    reconciliations_total: IntCounterVec,
    reconcile_errors_total: IntCounterVec,
    provisioning_requests: IntGaugeVec,
    phases: Mutex<HashMap<String, ProvisioningPhase>>,
    ready: AtomicBool,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconciliations_total = IntCounterVec::new(
            Opts::new("provisioning_reconciliations_total", "Total number of reconciliations"),
            &["resource"],
        )
        .map_err(registration_error)?;
        let reconcile_errors_total = IntCounterVec::new(
            Opts::new("provisioning_reconcile_errors_total", "Total number of failed reconciliations"),
            &["resource", "kind"],
        )
        .map_err(registration_error)?;
        let provisioning_requests = IntGaugeVec::new(
            Opts::new("provisioning_requests", "ProvisioningRequests by provisioning phase"),
            &["phase"],
        )
        .map_err(registration_error)?;

        registry
            .register(Box::new(reconciliations_total.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(reconcile_errors_total.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(provisioning_requests.clone()))
            .map_err(registration_error)?;

        Ok(Self {
            registry,
            reconciliations_total,
            reconcile_errors_total,
            provisioning_requests,
            phases: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
        })
    }

    pub fn record_reconciliation(&self, resource: &str) {
        self.reconciliations_total.with_label_values(&[resource]).inc();
    }

    pub fn record_error(&self, resource: &str, error: &ControllerError) {
        let kind = if error.is_input_error() {
            "input"
        } else if error.is_conflict() {
            "conflict"
        } else {
            "transient"
        };
        self.reconcile_errors_total.with_label_values(&[resource, kind]).inc();
    }

    /// Track the current phase of a request in the per-phase gauge
    pub fn observe_phase(&self, request: &str, phase: ProvisioningPhase) {
        let Ok(mut phases) = self.phases.lock() else {
            return;
        };
        if let Some(previous) = phases.insert(request.to_string(), phase) {
            if previous == phase {
                return;
            }
            self.provisioning_requests.with_label_values(&[previous.as_str()]).dec();
        }
        self.provisioning_requests.with_label_values(&[phase.as_str()]).inc();
    }

    /// Drop a deleted request from the per-phase gauge
    pub fn forget(&self, request: &str) {
        let Ok(mut phases) = self.phases.lock() else {
            return;
        };
        if let Some(previous) = phases.remove(request) {
            self.provisioning_requests.with_label_values(&[previous.as_str()]).dec();
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Metrics in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ControllerError::Store(format!("failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| ControllerError::Store(format!("metrics are not valid UTF-8: {}", e)))
    }
}

fn registration_error(e: prometheus::Error) -> ControllerError {
    ControllerError::InvalidConfig(format!("failed to register metrics: {}", e))
}

/// Router serving `/healthz`, `/readyz` and `/metrics`
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

/// Serve health checks and metrics until the listener fails
pub async fn serve(address: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("failed to bind {}: {}", address, e)))?;
    info!("Serving health checks and metrics on {}", address);
    axum::serve(listener, router(metrics))
        .await
        .map_err(|e| ControllerError::Watch(format!("metrics server failed: {}", e)))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    if metrics.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "watchers not started")
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            warn!("{}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_gauge_moves_with_request() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_phase("pr-1", ProvisioningPhase::Progressing);
        metrics.observe_phase("pr-2", ProvisioningPhase::Progressing);
        metrics.observe_phase("pr-1", ProvisioningPhase::Fulfilled);
        metrics.observe_phase("pr-1", ProvisioningPhase::Fulfilled);

        let gauge = |phase: ProvisioningPhase| metrics.provisioning_requests.with_label_values(&[phase.as_str()]).get();
        assert_eq!(gauge(ProvisioningPhase::Progressing), 1);
        assert_eq!(gauge(ProvisioningPhase::Fulfilled), 1);

        metrics.forget("pr-1");
        assert_eq!(gauge(ProvisioningPhase::Fulfilled), 0);
    }

    #[test]
    fn test_render_includes_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconciliation("ProvisioningRequest");
        metrics.record_error("ProvisioningRequest", &ControllerError::Input("bad".to_string()));

        let body = metrics.render().unwrap();
        assert!(body.contains("provisioning_reconciliations_total{resource=\"ProvisioningRequest\"} 1"));
        assert!(body.contains("kind=\"input\""));
    }

    #[test]
    fn test_readiness_flag() {
        let metrics = Metrics::new().unwrap();
        assert!(!metrics.is_ready());
        metrics.set_ready();
        assert!(metrics.is_ready());
    }
}
