//! Prometheus metrics and the HTTP endpoints serving them.
//!
//! `/metrics` is served on the metrics address, `/healthz` and `/readyz` on
//! the health probe address.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::ControllerError;

/// Reconcile counters per resource kind.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    errors: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();
        let reconciles = IntCounterVec::new(
            Opts::new("byoh_reconcile_total", "Reconciliations run, per resource kind"),
            &["kind"],
        )
        .map_err(|e| ControllerError::Metrics(e.to_string()))?;
        let errors = IntCounterVec::new(
            Opts::new("byoh_reconcile_errors_total", "Failed reconciliations, per resource kind"),
            &["kind"],
        )
        .map_err(|e| ControllerError::Metrics(e.to_string()))?;

        registry
            .register(Box::new(reconciles.clone()))
            .map_err(|e| ControllerError::Metrics(e.to_string()))?;
        registry
            .register(Box::new(errors.clone()))
            .map_err(|e| ControllerError::Metrics(e.to_string()))?;

        Ok(Self { registry, reconciles, errors })
    }

    pub fn record_reconcile(&self, kind: &str) {
        self.reconciles.with_label_values(&[kind]).inc();
    }

    pub fn record_error(&self, kind: &str) {
        self.errors.with_label_values(&[kind]).inc();
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|e| ControllerError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| ControllerError::Metrics(e.to_string()))
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                e.to_string(),
            )
        }
    }
}

pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
        .layer(TraceLayer::new_for_http())
}

pub fn probe_router() -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
}

/// Serves `router` on `addr` until the listener fails.
pub async fn serve(addr: SocketAddr, router: Router) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Metrics(format!("failed to bind {}: {}", addr, e)))?;
    info!("Serving HTTP endpoints on {}", addr);
    axum::serve(listener, router)
        .await
        .map_err(|e| ControllerError::Metrics(format!("HTTP server on {} failed: {}", addr, e)))
}
