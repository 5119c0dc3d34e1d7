//! Prometheus metrics for the reconcile loop and the HTTP endpoint serving them.
//!
//! Collectors are registered into a caller-supplied [`Registry`]; nothing is
//! process-global.

use crate::controllers::ApplyOutcome;
use crate::error::OperatorError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use tokio::time::Instant;
use tracing::info;

const NAMESPACE: &str = "application_operator";

const DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: Histogram,
    pub child_writes: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let reconciliations = IntCounter::with_opts(
            Opts::new("reconciliations_total", "Reconcile passes started").namespace(NAMESPACE),
        )?;
        let failures = IntCounterVec::new(
            Opts::new("reconcile_failures_total", "Reconcile passes that returned an error")
                .namespace(NAMESPACE),
            &["error"],
        )?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new("reconcile_duration_seconds", "Duration of a reconcile pass")
                .namespace(NAMESPACE)
                .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        let child_writes = IntCounterVec::new(
            Opts::new("child_writes_total", "Managed resources created, updated or deleted")
                .namespace(NAMESPACE),
            &["kind", "outcome"],
        )?;
        Ok(Self {
            reconciliations,
            failures,
            reconcile_duration,
            child_writes,
        })
    }

    /// Register every collector into `registry`.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.child_writes.clone()))?;
        Ok(self)
    }

    /// Count a pass and time it until the returned guard drops.
    pub fn count_and_measure(&self) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
        }
    }

    pub fn reconcile_failure(&self, error: &OperatorError) {
        self.failures
            .with_label_values(&[error.metric_label()])
            .inc();
    }

    /// Record a synchronizer outcome; `Unchanged` is not counted.
    pub fn child_outcome(&self, kind: &str, outcome: ApplyOutcome) {
        if outcome.is_change() {
            self.child_writes
                .with_label_values(&[kind, outcome.as_str()])
                .inc();
        }
    }
}

/// Observes the elapsed time of a reconcile pass on drop
pub struct ReconcileMeasurer {
    start: Instant,
    metric: Histogram,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        self.metric.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Text exposition of everything in the registry
pub fn encode(registry: &Registry) -> Result<Vec<u8>, prometheus::Error> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    Ok(buf)
}

async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    match encode(&registry) {
        Ok(body) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(registry)
}

/// Serve `/metrics` and `/healthz` until the task is dropped.
pub async fn serve(addr: SocketAddr, registry: Registry) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics endpoint listening");
    axum::serve(listener, router(registry)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_encode() {
        let registry = Registry::new();
        let metrics = Metrics::new().unwrap().register(&registry).unwrap();

        {
            let _timer = metrics.count_and_measure();
        }
        metrics.child_outcome("ConfigMap", ApplyOutcome::Created);
        metrics.child_outcome("ConfigMap", ApplyOutcome::Unchanged);
        metrics.reconcile_failure(&OperatorError::InvalidSpec("x".to_string()));

        let text = String::from_utf8(encode(&registry).unwrap()).unwrap();
        assert!(text.contains("application_operator_reconciliations_total 1"));
        assert!(text.contains(r#"application_operator_child_writes_total{kind="ConfigMap",outcome="created"} 1"#));
        assert!(!text.contains(r#"outcome="unchanged""#));
        assert!(text.contains(r#"application_operator_reconcile_failures_total{error="invalid_spec"} 1"#));
        assert!(text.contains("application_operator_reconcile_duration_seconds_count 1"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        Metrics::new().unwrap().register(&registry).unwrap();
        assert!(Metrics::new().unwrap().register(&registry).is_err());
    }
}
