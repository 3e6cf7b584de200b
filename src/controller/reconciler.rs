//! Reconciliation logic for Backstage resources
//!
//! One pass per CR: build the desired model from the CR and its layered
//! configuration, converge every object toward it, then report the outcome
//! on the `Deployed` condition.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use kube::ResourceExt;
use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::client::ClusterClient;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::state_machine::{PassEvent, PassTracker, TransitionContext};
use crate::controller::status::StatusManager;
use crate::controller::validation::validate_spec;
use crate::crd::Backstage;
use crate::model::layering::ManifestKind;
use crate::model::spec::{NormalizedSpec, translate};
use crate::model::{
    ApplyPolicy, ExternalConfig, ModelInputs, ResolvedModel, build_model_from_spec,
};

/// What one pass did to the cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Objects the model asked for
    pub desired: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl ApplySummary {
    /// Number of write calls issued
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Desired objects neither applied nor confirmed unchanged
    pub fn pending(&self) -> usize {
        self.desired
            .saturating_sub(self.created + self.updated + self.unchanged)
    }
}

fn instance_key(backstage: &Backstage) -> String {
    format!(
        "{}/{}",
        backstage.namespace().unwrap_or_default(),
        backstage.name_any()
    )
}

/// Main reconciliation function
#[instrument(skip(backstage, ctx), fields(name = %backstage.name_any(), namespace = backstage.namespace().unwrap_or_default()))]
pub async fn reconcile(backstage: Arc<Backstage>, ctx: Arc<Context>) -> Result<Action> {
    let ns = backstage.namespace().unwrap_or_default();
    let name = backstage.name_any();
    let key = instance_key(&backstage);

    // Children are removed by owner-reference garbage collection
    if backstage.metadata.deletion_timestamp.is_some() {
        debug!("Backstage is being deleted, nothing to do");
        ctx.forget(&key);
        if let Some(state) = &ctx.health_state {
            state.metrics.forget_instance(&ns, &name);
        }
        return Ok(Action::await_change());
    }

    let started = Instant::now();
    let status = StatusManager::new(&backstage, ctx.client.as_ref());

    let mut tracker = ctx.begin_pass(&key);
    let result = run_pass(&backstage, &ctx, &mut tracker).await;
    if result.is_err() {
        tracker.fail();
    }
    ctx.end_pass(&key, &tracker);

    if let Some(state) = &ctx.health_state {
        state
            .metrics
            .record_reconcile(&ns, &name, started.elapsed().as_secs_f64());
        state.metrics.set_phase(&ns, &name, tracker.phase());
    }

    match result {
        Ok(summary) => {
            info!(
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                unchanged = summary.unchanged,
                "Reconciliation completed successfully"
            );
            ctx.reset_failures(&key);
            status.set_deployed().await?;
            Ok(Action::requeue(ctx.config.requeue_interval))
        }
        Err(e) => {
            error!(reason = e.reason(), phase = %tracker.phase(), "Reconciliation failed: {}", e);
            if let Err(status_err) = status.set_failed(&e).await {
                warn!("Failed to record failure in status: {}", status_err);
            }
            Err(e)
        }
    }
}

/// Build, then apply; the tracker only moves on when each step finished
async fn run_pass(
    backstage: &Backstage,
    ctx: &Context,
    tracker: &mut PassTracker,
) -> Result<ApplySummary> {
    let model = build(backstage, ctx).await?;
    tracker.advance(PassEvent::ModelBuilt, &TransitionContext::default())?;

    let ns = backstage.namespace().unwrap_or_default();
    let summary = converge(ctx.client.as_ref(), &ns, backstage.uid().as_deref(), &model).await?;
    tracker.advance(
        PassEvent::ObjectsConverged,
        &TransitionContext {
            pending_objects: summary.pending(),
        },
    )?;
    Ok(summary)
}

async fn build(backstage: &Backstage, ctx: &Context) -> Result<ResolvedModel> {
    let spec = translate(&backstage.spec);
    validate_spec(&spec, &ctx.platform)?;

    let ns = backstage.namespace().unwrap_or_default();
    let external = fetch_external_config(ctx.client.as_ref(), &ns, &spec).await?;

    build_model_from_spec(
        backstage,
        &spec,
        &ModelInputs {
            bundle: &ctx.bundle,
            external: &external,
            platform: &ctx.platform,
            images: &ctx.config.images,
        },
    )
}

/// Read the raw override ConfigMaps and every referenced ConfigMap
pub async fn fetch_external_config(
    client: &dyn ClusterClient,
    ns: &str,
    spec: &NormalizedSpec,
) -> Result<ExternalConfig> {
    let mut external = ExternalConfig::default();

    let raw_sources = [
        (spec.raw_config.backstage_config.as_deref(), false),
        (spec.raw_config.local_db_config.as_deref(), true),
    ];
    for (name, database) in raw_sources {
        let Some(name) = name else { continue };
        let config_map = require_config_map(client, ns, name).await?;
        for (key, document) in config_map.data.unwrap_or_default() {
            match ManifestKind::from_key(&key) {
                Some(kind) if kind.is_database() == database => {
                    external.raw_config.insert(key, document);
                }
                _ => warn!(config_map = name, key, "ignoring unknown raw runtime config key"),
            }
        }
    }

    fetch_all(
        client,
        ns,
        spec.app_config.config_maps.iter().map(|r| r.name.as_str()),
        &mut external.app_configs,
    )
    .await?;
    fetch_all(
        client,
        ns,
        spec.extra_files.config_maps.iter().map(|r| r.name.as_str()),
        &mut external.extra_file_config_maps,
    )
    .await?;
    fetch_all(
        client,
        ns,
        spec.extra_envs.config_maps.iter().map(|r| r.name.as_str()),
        &mut external.extra_env_config_maps,
    )
    .await?;

    Ok(external)
}

async fn require_config_map(
    client: &dyn ClusterClient,
    ns: &str,
    name: &str,
) -> Result<k8s_openapi::api::core::v1::ConfigMap> {
    client
        .get_config_map(ns, name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("ConfigMap {ns}/{name}")))
}

async fn fetch_all<'n>(
    client: &dyn ClusterClient,
    ns: &str,
    names: impl Iterator<Item = &'n str>,
    into: &mut BTreeMap<String, k8s_openapi::api::core::v1::ConfigMap>,
) -> Result<()> {
    for name in names {
        if into.contains_key(name) {
            continue;
        }
        let config_map = require_config_map(client, ns, name).await?;
        into.insert(name.to_string(), config_map);
    }
    Ok(())
}

/// Drive the cluster toward `model`.
///
/// Desired objects are created when missing and reapplied when the desired
/// state changed or an owned field drifted; create-only objects are never
/// updated. Objects listed as absent are deleted only when this instance
/// controls them.
pub async fn converge(
    client: &dyn ClusterClient,
    ns: &str,
    owner_uid: Option<&str>,
    model: &ResolvedModel,
) -> Result<ApplySummary> {
    let desired_objects = model.desired_objects()?;
    let mut summary = ApplySummary {
        desired: desired_objects.len(),
        ..Default::default()
    };

    for desired in desired_objects {
        let identity = &desired.identity;
        let observed = client
            .get_object(ns, identity.kind, &identity.name)
            .await
            .map_err(|e| Error::apply(identity.kind.as_str(), &identity.name, e))?;

        let needs_apply = match (&observed, desired.policy) {
            (None, _) => true,
            (Some(_), ApplyPolicy::CreateOnly) => false,
            (Some(existing), ApplyPolicy::CreateOrUpdate) => !desired.is_satisfied_by(existing)?,
        };

        if !needs_apply {
            summary.unchanged += 1;
            continue;
        }

        client
            .apply_object(ns, identity.kind, &desired.object)
            .await
            .map_err(|e| Error::apply(identity.kind.as_str(), &identity.name, e))?;

        if observed.is_some() {
            debug!(object = %identity, "updated");
            summary.updated += 1;
        } else {
            info!(object = %identity, "created");
            summary.created += 1;
        }
    }

    for identity in &model.absent {
        let observed = client
            .get_object(ns, identity.kind, &identity.name)
            .await
            .map_err(|e| Error::apply(identity.kind.as_str(), &identity.name, e))?;
        let Some(existing) = observed else { continue };

        if !is_controlled_by(&existing, owner_uid) {
            debug!(object = %identity, "not controlled by this instance, leaving in place");
            continue;
        }

        client
            .delete_object(ns, identity.kind, &identity.name)
            .await
            .map_err(|e| Error::apply(identity.kind.as_str(), &identity.name, e))?;
        info!(object = %identity, "deleted");
        summary.deleted += 1;
    }

    Ok(summary)
}

fn is_controlled_by(object: &DynamicObject, owner_uid: Option<&str>) -> bool {
    let Some(uid) = owner_uid else { return false };
    object
        .metadata
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.uid == uid && owner.controller == Some(true))
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(backstage: Arc<Backstage>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = instance_key(&backstage);
    let attempt = ctx.record_failure(&key);
    let delay = ctx
        .backoff
        .delay_for_error(error, attempt, ctx.config.requeue_interval);

    if let Some(state) = &ctx.health_state {
        state.metrics.record_error(
            &backstage.namespace().unwrap_or_default(),
            &backstage.name_any(),
        );
    }

    if error.is_retryable() {
        warn!(
            "Retryable error for {} (attempt {}): {}, requeuing in {:?}",
            key,
            attempt + 1,
            error,
            delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?}",
            key, error, delay
        );
    }

    Action::requeue(delay)
}
