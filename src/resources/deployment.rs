//! Backend Deployment generation
//!
//! The manifest supplies the pod shape. On top of it the builder sets the
//! replicas, image and pull secrets, and appends the volumes, mounts, args
//! and environment derived from the CR's app-config, extra file, extra env
//! and dynamic plugin settings.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, ConfigMapKeySelector, ConfigMapVolumeSource, Container, EnvFromSource,
    EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretEnvSource, SecretKeySelector,
    SecretVolumeSource, Volume, VolumeMount,
};

use crate::controller::error::{Error, Result};
use crate::model::layering::ResolvedDocument;
use crate::model::spec::{DynamicPluginsSource, FileMount, NormalizedSpec};
use crate::platform::PlatformDefaults;
use crate::resources::app_config::{DEFAULT_APP_CONFIG_KEY, DYNAMIC_PLUGINS_KEY};
use crate::resources::common::{
    BuildContext, app_config_name, app_name, apply_pull_secrets, db_name, db_secret_name,
    main_container, resolve_image, select_pods, volume_name,
};

/// Name of the backend container in the manifest
pub const BACKEND_CONTAINER: &str = "backstage-backend";

/// Name of the plugin installer init container in the manifest
pub const INSTALL_PLUGINS_CONTAINER: &str = "install-dynamic-plugins";

/// Image used when neither the CR, the environment nor the manifest set one
pub const FALLBACK_BACKSTAGE_IMAGE: &str = "quay.io/rhdh/rhdh-hub-rhel9:next";

const DEFAULT_APP_CONFIG_DIR: &str = "/opt/app-root/src/default-app-config";
const DYNAMIC_PLUGINS_MOUNT: &str = "/opt/app-root/src/dynamic-plugins.yaml";
const DEFAULT_APP_CONFIG_VOLUME: &str = "default-app-config";
const DYNAMIC_PLUGINS_VOLUME: &str = "dynamic-plugins-conf";

/// Generate the backend Deployment
pub fn build_deployment(
    doc: &ResolvedDocument,
    spec: &NormalizedSpec,
    platform: &PlatformDefaults,
    ctx: &BuildContext<'_>,
) -> Result<Option<Deployment>> {
    let cr_name = ctx.cr_name();
    let name = app_name(&cr_name);
    let mut deployment: Deployment = doc.parse()?;
    ctx.stamp(&mut deployment.metadata, name.clone(), "backend");

    let deployment_spec = deployment.spec.get_or_insert_with(DeploymentSpec::default);
    if let Some(replicas) = spec.replicas {
        deployment_spec.replicas = Some(replicas);
    }
    select_pods(
        &mut deployment_spec.selector,
        &mut deployment_spec.template.metadata,
        &name,
    );

    let pod = pod_spec(&mut deployment_spec.template, doc)?;
    apply_pull_secrets(pod, spec, platform);
    set_images(pod, spec, ctx);

    let mut mounts = PodMounts::default();
    mount_default_app_config(&mut mounts, &cr_name);
    mount_app_configs(&mut mounts, spec, ctx)?;
    mount_extra_files(&mut mounts, spec, ctx)?;
    let plugins_volume = dynamic_plugins_volume(spec, &cr_name);

    let backend = main_container(&mut pod.containers, BACKEND_CONTAINER)
        .ok_or_else(|| no_container(doc, BACKEND_CONTAINER))?;
    backend
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .extend(mounts.mounts.iter().cloned());
    backend
        .args
        .get_or_insert_with(Vec::new)
        .extend(mounts.args.iter().flat_map(|path| ["--config".to_string(), path.clone()]));
    add_database_env(backend, spec, &cr_name);
    add_extra_envs(backend, spec);

    if let Some(installer) = pod
        .init_containers
        .as_mut()
        .and_then(|c| c.iter_mut().find(|c| c.name == INSTALL_PLUGINS_CONTAINER))
    {
        installer.volume_mounts.get_or_insert_with(Vec::new).push(VolumeMount {
            name: DYNAMIC_PLUGINS_VOLUME.to_string(),
            mount_path: DYNAMIC_PLUGINS_MOUNT.to_string(),
            sub_path: Some(DYNAMIC_PLUGINS_KEY.to_string()),
            read_only: Some(true),
            ..Default::default()
        });
        mounts.volumes.push(plugins_volume);
    }

    let volumes = pod.volumes.get_or_insert_with(Vec::new);
    for volume in mounts.volumes {
        if !volumes.iter().any(|v| v.name == volume.name) {
            volumes.push(volume);
        }
    }

    Ok(Some(deployment))
}

fn pod_spec<'p>(template: &'p mut PodTemplateSpec, doc: &ResolvedDocument) -> Result<&'p mut PodSpec> {
    let pod = template.spec.as_mut().ok_or_else(|| Error::ConfigParseError {
        key: doc.kind.key().to_string(),
        message: "pod template has no spec".to_string(),
    })?;
    if pod.containers.is_empty() {
        return Err(no_container(doc, BACKEND_CONTAINER));
    }
    Ok(pod)
}

fn no_container(doc: &ResolvedDocument, name: &str) -> Error {
    Error::ConfigParseError {
        key: doc.kind.key().to_string(),
        message: format!("no {name} container"),
    }
}

/// CR image, then the environment override, then the manifest
fn set_images(pod: &mut PodSpec, spec: &NormalizedSpec, ctx: &BuildContext<'_>) {
    let candidates = [spec.image.as_deref(), ctx.images.backstage.as_deref()];

    if let Some(backend) = main_container(&mut pod.containers, BACKEND_CONTAINER) {
        backend.image = Some(resolve_image(
            &candidates,
            backend.image.as_deref(),
            FALLBACK_BACKSTAGE_IMAGE,
        ));
    }
    if let Some(installer) = pod
        .init_containers
        .as_mut()
        .and_then(|c| c.iter_mut().find(|c| c.name == INSTALL_PLUGINS_CONTAINER))
    {
        installer.image = Some(resolve_image(
            &candidates,
            installer.image.as_deref(),
            FALLBACK_BACKSTAGE_IMAGE,
        ));
    }
}

#[derive(Default)]
struct PodMounts {
    volumes: Vec<Volume>,
    mounts: Vec<VolumeMount>,
    /// Files passed to the backend with `--config`
    args: Vec<String>,
}

impl PodMounts {
    fn add_volume(&mut self, volume: Volume) {
        if !self.volumes.iter().any(|v| v.name == volume.name) {
            self.volumes.push(volume);
        }
    }

    fn mount_key(&mut self, volume: &str, dir: &str, key: &str) -> String {
        let path = format!("{}/{key}", dir.trim_end_matches('/'));
        self.mounts.push(VolumeMount {
            name: volume.to_string(),
            mount_path: path.clone(),
            sub_path: Some(key.to_string()),
            read_only: Some(true),
            ..Default::default()
        });
        path
    }
}

fn config_map_volume(volume: &str, config_map: &str) -> Volume {
    Volume {
        name: volume.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            default_mode: Some(0o420),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn secret_volume(volume: &str, secret: &str) -> Volume {
    Volume {
        name: volume.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            default_mode: Some(0o420),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount_default_app_config(mounts: &mut PodMounts, cr_name: &str) {
    mounts.add_volume(config_map_volume(
        DEFAULT_APP_CONFIG_VOLUME,
        &app_config_name(cr_name),
    ));
    mounts.mounts.push(VolumeMount {
        name: DEFAULT_APP_CONFIG_VOLUME.to_string(),
        mount_path: DEFAULT_APP_CONFIG_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    });
    mounts
        .args
        .push(format!("{DEFAULT_APP_CONFIG_DIR}/{DEFAULT_APP_CONFIG_KEY}"));
}

/// Each app-config key becomes one file and one `--config` argument
fn mount_app_configs(
    mounts: &mut PodMounts,
    spec: &NormalizedSpec,
    ctx: &BuildContext<'_>,
) -> Result<()> {
    let dir = spec.app_config.mount_path.as_str();
    for reference in &spec.app_config.config_maps {
        let volume = volume_name("app-config", &reference.name);
        mounts.add_volume(config_map_volume(&volume, &reference.name));
        let keys = match &reference.key {
            Some(key) => vec![key.clone()],
            None => config_map_keys(ctx.external.app_configs.get(&reference.name), &reference.name)?,
        };
        for key in keys {
            let path = mounts.mount_key(&volume, dir, &key);
            mounts.args.push(path);
        }
    }
    Ok(())
}

fn mount_extra_files(
    mounts: &mut PodMounts,
    spec: &NormalizedSpec,
    ctx: &BuildContext<'_>,
) -> Result<()> {
    for FileMount {
        name,
        key,
        mount_path,
    } in &spec.extra_files.config_maps
    {
        let volume = volume_name("extra-cm", name);
        mounts.add_volume(config_map_volume(&volume, name));
        let keys = match key {
            Some(key) => vec![key.clone()],
            None => config_map_keys(ctx.external.extra_file_config_maps.get(name), name)?,
        };
        for key in keys {
            mounts.mount_key(&volume, mount_path, &key);
        }
    }

    for FileMount {
        name,
        key,
        mount_path,
    } in &spec.extra_files.secrets
    {
        let volume = volume_name("extra-secret", name);
        mounts.add_volume(secret_volume(&volume, name));
        match key {
            Some(key) => {
                mounts.mount_key(&volume, mount_path, key);
            }
            None => mounts.mounts.push(VolumeMount {
                name: volume,
                mount_path: format!("{}/{name}", mount_path.trim_end_matches('/')),
                read_only: Some(true),
                ..Default::default()
            }),
        }
    }
    Ok(())
}

fn config_map_keys(
    config_map: Option<&k8s_openapi::api::core::v1::ConfigMap>,
    name: &str,
) -> Result<Vec<String>> {
    let config_map = config_map.ok_or_else(|| Error::NotFound(format!("ConfigMap {name}")))?;
    let mut keys: Vec<String> = config_map
        .data
        .iter()
        .flat_map(|d| d.keys().cloned())
        .chain(config_map.binary_data.iter().flat_map(|d| d.keys().cloned()))
        .collect();
    keys.sort();
    keys.dedup();
    Ok(keys)
}

fn dynamic_plugins_volume(spec: &NormalizedSpec, cr_name: &str) -> Volume {
    let config_map = match &spec.dynamic_plugins {
        DynamicPluginsSource::ConfigMap(name) => name.clone(),
        _ => crate::resources::common::dynamic_plugins_name(cr_name),
    };
    config_map_volume(DYNAMIC_PLUGINS_VOLUME, &config_map)
}

/// Database location and credentials for the backend
fn add_database_env(backend: &mut Container, spec: &NormalizedSpec, cr_name: &str) {
    let credentials = match &spec.local_db.auth_secret_name {
        Some(name) => Some(name.clone()),
        None if spec.local_db.enabled => Some(db_secret_name(cr_name)),
        None => None,
    };

    if spec.local_db.enabled {
        upsert_env(
            backend,
            EnvVar {
                name: "POSTGRES_HOST".to_string(),
                value: Some(db_name(cr_name)),
                ..Default::default()
            },
        );
    }

    if let Some(secret) = credentials {
        backend.env_from.get_or_insert_with(Vec::new).push(EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: secret,
                optional: None,
            }),
            ..Default::default()
        });
    }
}

fn add_extra_envs(backend: &mut Container, spec: &NormalizedSpec) {
    let envs = &spec.extra_envs;

    for env in &envs.envs {
        upsert_env(
            backend,
            EnvVar {
                name: env.name.clone(),
                value: Some(env.value.clone()),
                ..Default::default()
            },
        );
    }

    for reference in &envs.config_maps {
        match &reference.key {
            Some(key) => upsert_env(
                backend,
                EnvVar {
                    name: key.clone(),
                    value_from: Some(EnvVarSource {
                        config_map_key_ref: Some(ConfigMapKeySelector {
                            name: reference.name.clone(),
                            key: key.clone(),
                            optional: None,
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ),
            None => backend.env_from.get_or_insert_with(Vec::new).push(EnvFromSource {
                config_map_ref: Some(ConfigMapEnvSource {
                    name: reference.name.clone(),
                    optional: None,
                }),
                ..Default::default()
            }),
        }
    }

    for reference in &envs.secrets {
        match &reference.key {
            Some(key) => upsert_env(
                backend,
                EnvVar {
                    name: key.clone(),
                    value_from: Some(EnvVarSource {
                        secret_key_ref: Some(SecretKeySelector {
                            name: reference.name.clone(),
                            key: key.clone(),
                            optional: None,
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ),
            None => backend.env_from.get_or_insert_with(Vec::new).push(EnvFromSource {
                secret_ref: Some(SecretEnvSource {
                    name: reference.name.clone(),
                    optional: None,
                }),
                ..Default::default()
            }),
        }
    }
}

/// Set an env var, replacing one with the same name
fn upsert_env(container: &mut Container, var: EnvVar) {
    let env = container.env.get_or_insert_with(Vec::new);
    match env.iter_mut().find(|e| e.name == var.name) {
        Some(existing) => *existing = var,
        None => env.push(var),
    }
}
