//! Health, readiness and metrics endpoints
//!
//! `/healthz` answers as long as the process runs. `/readyz` answers once
//! every [`ReadinessCheck`] passed: the manifest bundle loaded, the platform
//! was resolved and the controller started. `/metrics` exposes the
//! per-instance reconcile metrics in Prometheus text format.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use parking_lot::Mutex;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;

use crate::controller::state_machine::ReconcilePhase;

/// Address the health server binds to
pub const HEALTH_ADDR: &str = "0.0.0.0:8080";

const METRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct InstanceLabels {
    pub namespace: String,
    pub name: String,
}

impl InstanceLabels {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    pub namespace: String,
    pub name: String,
    pub phase: String,
}

/// Reconcile metrics of every Backstage instance
pub struct Metrics {
    pub reconciliations: Family<InstanceLabels, Counter>,
    pub reconciliation_errors: Family<InstanceLabels, Counter>,
    pub reconcile_duration_seconds: Family<InstanceLabels, Histogram>,
    /// 1 for the phase the last pass of an instance ended in, 0 for the others
    pub instance_phase: Family<PhaseLabels, Gauge>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("backstage_operator");
        let reconciliations = Family::default();
        let reconciliation_errors = Family::default();
        let reconcile_duration_seconds =
            Family::<InstanceLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 12))
            });
        let instance_phase = Family::default();

        registry.register(
            "reconciliations",
            "Reconcile passes per Backstage instance",
            reconciliations.clone(),
        );
        registry.register(
            "reconciliation_errors",
            "Failed reconcile passes per Backstage instance",
            reconciliation_errors.clone(),
        );
        registry.register(
            "reconcile_duration_seconds",
            "Duration of one reconcile pass",
            reconcile_duration_seconds.clone(),
        );
        registry.register(
            "instance_phase",
            "Phase the last reconcile pass of a Backstage instance ended in",
            instance_phase.clone(),
        );

        Self {
            reconciliations,
            reconciliation_errors,
            reconcile_duration_seconds,
            instance_phase,
            registry,
        }
    }

    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = InstanceLabels::new(namespace, name);
        self.reconciliations.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconciliation_errors
            .get_or_create(&InstanceLabels::new(namespace, name))
            .inc();
    }

    pub fn set_phase(&self, namespace: &str, name: &str, current: ReconcilePhase) {
        for phase in ReconcilePhase::ALL {
            self.instance_phase
                .get_or_create(&phase_labels(namespace, name, phase))
                .set(i64::from(phase == current));
        }
    }

    /// Drop the series of a deleted instance
    pub fn forget_instance(&self, namespace: &str, name: &str) {
        let labels = InstanceLabels::new(namespace, name);
        self.reconciliations.remove(&labels);
        self.reconciliation_errors.remove(&labels);
        self.reconcile_duration_seconds.remove(&labels);
        for phase in ReconcilePhase::ALL {
            self.instance_phase
                .remove(&phase_labels(namespace, name, phase));
        }
    }

    fn render(&self) -> Result<String, std::fmt::Error> {
        let mut body = String::new();
        encode(&mut body, &self.registry)?;
        Ok(body)
    }
}

fn phase_labels(namespace: &str, name: &str, phase: ReconcilePhase) -> PhaseLabels {
    PhaseLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
        phase: phase.to_string(),
    }
}

/// Startup steps that gate `/readyz`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadinessCheck {
    /// Base manifests loaded and validated
    Manifests,
    /// Target platform known
    Platform,
    /// Controller watching Backstage resources
    Controller,
}

impl ReadinessCheck {
    const ALL: [ReadinessCheck; 3] = [
        ReadinessCheck::Manifests,
        ReadinessCheck::Platform,
        ReadinessCheck::Controller,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            ReadinessCheck::Manifests => "manifests",
            ReadinessCheck::Platform => "platform",
            ReadinessCheck::Controller => "controller",
        }
    }
}

/// State shared between the controller and the health server
#[derive(Default)]
pub struct HealthState {
    pub metrics: Metrics,
    passed: Mutex<BTreeSet<ReadinessCheck>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pass(&self, check: ReadinessCheck) {
        self.passed.lock().insert(check);
    }

    /// Take the operator out of rotation, e.g. while shutting down
    pub fn withdraw(&self, check: ReadinessCheck) {
        self.passed.lock().remove(&check);
    }

    /// Checks that have not passed yet
    pub fn pending(&self) -> Vec<ReadinessCheck> {
        let passed = self.passed.lock();
        ReadinessCheck::ALL
            .into_iter()
            .filter(|check| !passed.contains(check))
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        self.pending().is_empty()
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<Arc<HealthState>>) -> (StatusCode, String) {
    let pending = state.pending();
    if pending.is_empty() {
        return (StatusCode::OK, "ready".to_string());
    }
    let names: Vec<&str> = pending.iter().map(ReadinessCheck::as_str).collect();
    (
        StatusCode::SERVICE_UNAVAILABLE,
        format!("waiting for {}", names.join(", ")),
    )
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the health endpoints until the listener fails
pub async fn serve(state: Arc<HealthState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(HEALTH_ADDR).await?;
    tracing::info!(address = HEALTH_ADDR, "health server listening");
    axum::serve(listener, router(state)).await
}
