//! Desired-state model of one Backstage instance
//!
//! [`build_model`] runs every object builder against the layered manifests
//! and returns a [`ResolvedModel`]: the objects that must exist, plus the
//! identities of objects that must not. The model is rebuilt from scratch on
//! every pass.

pub mod layering;
pub mod spec;

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{ApiResource, DynamicObject};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::ImageOverrides;
use crate::controller::error::Result;
use crate::crd::{Backstage, OpenShiftRoute};
use crate::platform::{Platform, PlatformDefaults};
use crate::resources::common::{
    BuildContext, DESIRED_STATE_ANNOTATION, app_name, db_name, db_secret_name,
    dynamic_plugins_name,
};
use crate::resources::{app_config, deployment, exposure, secret, service, statefulset};

use layering::{ConfigLayers, ManifestBundle, ManifestKind};
use spec::{DynamicPluginsSource, NormalizedSpec, translate};

/// Referenced objects fetched once per pass
#[derive(Clone, Debug, Default)]
pub struct ExternalConfig {
    /// Manifest key to full override document
    pub raw_config: BTreeMap<String, String>,
    pub app_configs: BTreeMap<String, ConfigMap>,
    pub extra_file_config_maps: BTreeMap<String, ConfigMap>,
    pub extra_env_config_maps: BTreeMap<String, ConfigMap>,
}

/// Cluster object kinds the operator manages
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    ConfigMap,
    Secret,
    Service,
    StatefulSet,
    Deployment,
    Route,
    Ingress,
}

impl ObjectKind {
    pub fn api_resource(&self) -> ApiResource {
        match self {
            ObjectKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            ObjectKind::Secret => ApiResource::erase::<Secret>(&()),
            ObjectKind::Service => ApiResource::erase::<Service>(&()),
            ObjectKind::StatefulSet => ApiResource::erase::<StatefulSet>(&()),
            ObjectKind::Deployment => ApiResource::erase::<Deployment>(&()),
            ObjectKind::Route => ApiResource::erase::<OpenShiftRoute>(&()),
            ObjectKind::Ingress => ApiResource::erase::<Ingress>(&()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::Secret => "Secret",
            ObjectKind::Service => "Service",
            ObjectKind::StatefulSet => "StatefulSet",
            ObjectKind::Deployment => "Deployment",
            ObjectKind::Route => "Route",
            ObjectKind::Ingress => "Ingress",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectIdentity {
    pub kind: ObjectKind,
    pub name: String,
}

impl ObjectIdentity {
    pub fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// How an object is converged once it exists
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyPolicy {
    /// Created when absent, updated when the desired state changes
    CreateOrUpdate,
    /// Created when absent, never touched afterwards
    CreateOnly,
}

/// One object ready to be applied
#[derive(Clone, Debug)]
pub struct DesiredObject {
    pub identity: ObjectIdentity,
    pub policy: ApplyPolicy,
    pub object: DynamicObject,
    /// Hash of the object, also stored in its annotations
    pub hash: String,
}

impl DesiredObject {
    fn new<T: Serialize>(kind: ObjectKind, policy: ApplyPolicy, typed: &T) -> Result<Self> {
        let value = serde_json::to_value(typed)?;
        let hash = format!("{:x}", Sha256::digest(serde_json::to_vec(&value)?));
        let mut object: DynamicObject = serde_json::from_value(value)?;
        object
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(DESIRED_STATE_ANNOTATION.to_string(), hash.clone());
        let name = object.metadata.name.clone().unwrap_or_default();

        Ok(Self {
            identity: ObjectIdentity::new(kind, name),
            policy,
            object,
            hash,
        })
    }

    /// Whether `observed` still carries this desired state.
    ///
    /// The stored hash must match, and every field the operator sets must
    /// hold the same value in `observed`. Fields only the cluster sets are
    /// ignored, so edits to owned fields count as drift while server
    /// defaults and status do not.
    pub fn is_satisfied_by(&self, observed: &DynamicObject) -> Result<bool> {
        let stored_hash = observed
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(DESIRED_STATE_ANNOTATION));
        if stored_hash != Some(&self.hash) {
            return Ok(false);
        }
        let desired = serde_json::to_value(&self.object)?;
        let observed = serde_json::to_value(observed)?;
        Ok(contains(Some(&observed), &desired))
    }
}

/// `desired` is contained in `observed`: maps by key, lists element-wise.
///
/// A null, empty list or empty map in `desired` also matches a missing
/// field, since the API server drops those on write.
fn contains(observed: Option<&Value>, desired: &Value) -> bool {
    match (desired, observed) {
        (Value::Null, _) => true,
        (Value::Array(items), None) => items.is_empty(),
        (Value::Object(fields), None) => fields.is_empty(),
        (_, None) => false,
        (Value::Object(fields), Some(Value::Object(observed))) => fields
            .iter()
            .all(|(key, value)| contains(observed.get(key), value)),
        (Value::Array(items), Some(Value::Array(observed))) => {
            items.len() == observed.len()
                && items
                    .iter()
                    .zip(observed)
                    .all(|(item, seen)| contains(Some(seen), item))
        }
        (desired, Some(observed)) => desired == observed,
    }
}

/// Inputs of [`build_model`] that do not come from the CR
#[derive(Clone, Copy, Debug)]
pub struct ModelInputs<'a> {
    pub bundle: &'a ManifestBundle,
    pub external: &'a ExternalConfig,
    pub platform: &'a PlatformDefaults,
    pub images: &'a ImageOverrides,
}

/// Every object of one instance, as it should be
#[derive(Clone, Debug, Default)]
pub struct ResolvedModel {
    pub app_config: Option<ConfigMap>,
    pub dynamic_plugins: Option<ConfigMap>,
    pub local_db_secret: Option<Secret>,
    pub local_db_service: Option<Service>,
    pub local_db_statefulset: Option<StatefulSet>,
    pub backstage_service: Option<Service>,
    pub backstage_deployment: Option<Deployment>,
    pub route: Option<OpenShiftRoute>,
    pub ingress: Option<Ingress>,
    /// Objects that must not exist
    pub absent: Vec<ObjectIdentity>,
}

impl ResolvedModel {
    /// Desired objects in dependency order: config and secrets, services,
    /// workloads, then exposure.
    pub fn desired_objects(&self) -> Result<Vec<DesiredObject>> {
        use ApplyPolicy::{CreateOnly, CreateOrUpdate};

        let mut objects = Vec::new();
        if let Some(cm) = &self.app_config {
            objects.push(DesiredObject::new(ObjectKind::ConfigMap, CreateOrUpdate, cm)?);
        }
        if let Some(cm) = &self.dynamic_plugins {
            objects.push(DesiredObject::new(ObjectKind::ConfigMap, CreateOrUpdate, cm)?);
        }
        if let Some(db_secret) = &self.local_db_secret {
            let mut db_secret = db_secret.clone();
            secret::fill_generated_passwords(&mut db_secret);
            objects.push(DesiredObject::new(ObjectKind::Secret, CreateOnly, &db_secret)?);
        }
        if let Some(svc) = &self.local_db_service {
            objects.push(DesiredObject::new(ObjectKind::Service, CreateOrUpdate, svc)?);
        }
        if let Some(svc) = &self.backstage_service {
            objects.push(DesiredObject::new(ObjectKind::Service, CreateOrUpdate, svc)?);
        }
        if let Some(sts) = &self.local_db_statefulset {
            objects.push(DesiredObject::new(ObjectKind::StatefulSet, CreateOrUpdate, sts)?);
        }
        if let Some(deploy) = &self.backstage_deployment {
            objects.push(DesiredObject::new(ObjectKind::Deployment, CreateOrUpdate, deploy)?);
        }
        if let Some(route) = &self.route {
            objects.push(DesiredObject::new(ObjectKind::Route, CreateOrUpdate, route)?);
        }
        if let Some(ingress) = &self.ingress {
            objects.push(DesiredObject::new(ObjectKind::Ingress, CreateOrUpdate, ingress)?);
        }
        Ok(objects)
    }
}

/// Build the desired-state model of `backstage`
pub fn build_model(backstage: &Backstage, inputs: &ModelInputs<'_>) -> Result<ResolvedModel> {
    let spec = translate(&backstage.spec);
    build_model_from_spec(backstage, &spec, inputs)
}

pub(crate) fn build_model_from_spec(
    backstage: &Backstage,
    spec: &NormalizedSpec,
    inputs: &ModelInputs<'_>,
) -> Result<ResolvedModel> {
    let layers = ConfigLayers::new(inputs.bundle, &inputs.external.raw_config);
    let ctx = BuildContext::new(backstage, inputs.images, inputs.external);
    let platform = inputs.platform;
    let cr_name = ctx.cr_name();

    let mut model = ResolvedModel {
        app_config: app_config::build_app_config(
            &layers.resolve(ManifestKind::AppConfig)?,
            spec,
            platform,
            &ctx,
        )?,
        backstage_service: service::build_app_service(
            &layers.resolve(ManifestKind::Service)?,
            spec,
            platform,
            &ctx,
        )?,
        backstage_deployment: deployment::build_deployment(
            &layers.resolve(ManifestKind::Deployment)?,
            spec,
            platform,
            &ctx,
        )?,
        ..Default::default()
    };

    if matches!(spec.dynamic_plugins, DynamicPluginsSource::ConfigMap(_)) {
        model.absent.push(ObjectIdentity::new(
            ObjectKind::ConfigMap,
            dynamic_plugins_name(&cr_name),
        ));
    } else {
        model.dynamic_plugins = app_config::build_dynamic_plugins(
            &layers.resolve(ManifestKind::DynamicPlugins)?,
            spec,
            platform,
            &ctx,
        )?;
    }

    if spec.local_db.enabled {
        if spec.local_db.auth_secret_name.is_none() {
            model.local_db_secret = secret::build_db_secret(
                &layers.resolve(ManifestKind::DbSecret)?,
                spec,
                platform,
                &ctx,
            )?;
        } else {
            model.absent.push(ObjectIdentity::new(
                ObjectKind::Secret,
                db_secret_name(&cr_name),
            ));
        }
        model.local_db_service = service::build_db_service(
            &layers.resolve(ManifestKind::DbService)?,
            spec,
            platform,
            &ctx,
        )?;
        model.local_db_statefulset = statefulset::build_db_statefulset(
            &layers.resolve(ManifestKind::DbStatefulSet)?,
            spec,
            platform,
            &ctx,
        )?;
    } else {
        model.absent.extend([
            ObjectIdentity::new(ObjectKind::StatefulSet, db_name(&cr_name)),
            ObjectIdentity::new(ObjectKind::Service, db_name(&cr_name)),
            ObjectIdentity::new(ObjectKind::Secret, db_secret_name(&cr_name)),
        ]);
    }

    match platform.platform {
        Platform::ManagedPlatform => {
            if spec.route.enabled() {
                model.route = exposure::build_route(
                    &layers.resolve(ManifestKind::Route)?,
                    spec,
                    platform,
                    &ctx,
                )?;
            } else {
                model
                    .absent
                    .push(ObjectIdentity::new(ObjectKind::Route, app_name(&cr_name)));
            }
        }
        Platform::Default => {
            if spec.ingress.enabled {
                model.ingress = exposure::build_ingress(
                    &layers.resolve(ManifestKind::Ingress)?,
                    spec,
                    platform,
                    &ctx,
                )?;
            } else {
                model
                    .absent
                    .push(ObjectIdentity::new(ObjectKind::Ingress, app_name(&cr_name)));
            }
        }
    }

    Ok(model)
}
