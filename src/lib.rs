pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod model;
pub mod platform;
pub mod resources;

pub use config::OperatorConfig;
pub use controller::{
    ApplySummary, BackoffConfig, ClusterClient, Context, Error, KubeClusterClient, Result,
    error_policy, reconcile,
};
pub use crd::{Backstage, BackstageSpec, BackstageStatus, OpenShiftRoute};
pub use health::{HealthState, Metrics, ReadinessCheck};
pub use model::layering::ManifestBundle;
pub use platform::{Platform, PlatformDefaults};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::Controller;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Run the Backstage controller.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
/// Besides the Backstage CRs, every kind the operator creates is watched so
/// that drift on a child triggers a pass of its owner. Routes are only
/// watched on the managed platform and ingresses only elsewhere.
pub async fn run_controller(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        platform = %ctx.platform.platform,
        "Starting controller for Backstage resources (scope: {})",
        scope_msg
    );

    if let Some(ref state) = ctx.health_state {
        state.pass(ReadinessCheck::Controller);
    }

    let watcher_config = WatcherConfig::default().any_semantic();
    let controller_config = ControllerConfig::default().concurrency(ctx.config.concurrency);

    let backstages: Api<Backstage> = scoped_api(client.clone(), namespace);
    let mut controller = Controller::new(backstages, watcher_config.clone())
        .with_config(controller_config)
        .owns(
            scoped_api::<Deployment>(client.clone(), namespace),
            watcher_config.clone(),
        )
        .owns(
            scoped_api::<StatefulSet>(client.clone(), namespace),
            watcher_config.clone(),
        )
        .owns(
            scoped_api::<Service>(client.clone(), namespace),
            watcher_config.clone(),
        )
        .owns(
            scoped_api::<ConfigMap>(client.clone(), namespace),
            watcher_config.clone(),
        )
        .owns(
            scoped_api::<Secret>(client.clone(), namespace),
            watcher_config.clone(),
        );

    controller = if ctx.platform.supports_routes() {
        controller.owns(
            scoped_api::<OpenShiftRoute>(client.clone(), namespace),
            watcher_config,
        )
    } else {
        controller.owns(scoped_api::<Ingress>(client, namespace), watcher_config)
    };

    controller
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Watch events for children can outlive their owner
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    tracing::error!("Controller stream ended unexpectedly");
}
