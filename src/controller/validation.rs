//! Validation of a normalized Backstage spec against the platform

use crate::controller::error::{Error, Result};
use crate::model::spec::NormalizedSpec;
use crate::platform::{Platform, PlatformDefaults};

/// Minimum number of backend replicas
pub const MIN_REPLICAS: i32 = 0;

/// Validate the spec
pub fn validate_spec(spec: &NormalizedSpec, platform: &PlatformDefaults) -> Result<()> {
    validate_exposure(spec, platform)?;
    validate_replicas(spec)?;
    validate_references(spec)?;
    Ok(())
}

/// Routes only exist on the managed platform, ingresses only elsewhere
fn validate_exposure(spec: &NormalizedSpec, platform: &PlatformDefaults) -> Result<()> {
    match platform.platform {
        Platform::Default if spec.route.requested == Some(true) => Err(Error::ValidationError(
            "route.enabled is only supported on platforms serving the route API".to_string(),
        )),
        Platform::ManagedPlatform if spec.ingress.enabled => Err(Error::ValidationError(
            "ingress.enabled is not supported on platforms serving the route API, use route"
                .to_string(),
        )),
        _ => Ok(()),
    }
}

fn validate_replicas(spec: &NormalizedSpec) -> Result<()> {
    match spec.replicas {
        Some(replicas) if replicas < MIN_REPLICAS => Err(Error::ValidationError(format!(
            "replica count {replicas} is below minimum {MIN_REPLICAS}"
        ))),
        _ => Ok(()),
    }
}

fn validate_references(spec: &NormalizedSpec) -> Result<()> {
    let names = spec
        .app_config
        .config_maps
        .iter()
        .map(|r| ("appConfig.configMaps", r.name.as_str()))
        .chain(
            spec.extra_files
                .config_maps
                .iter()
                .map(|r| ("extraFiles.configMaps", r.name.as_str())),
        )
        .chain(
            spec.extra_files
                .secrets
                .iter()
                .map(|r| ("extraFiles.secrets", r.name.as_str())),
        )
        .chain(
            spec.extra_envs
                .config_maps
                .iter()
                .map(|r| ("extraEnvs.configMaps", r.name.as_str())),
        )
        .chain(
            spec.extra_envs
                .secrets
                .iter()
                .map(|r| ("extraEnvs.secrets", r.name.as_str())),
        );

    for (field, name) in names {
        if name.trim().is_empty() {
            return Err(Error::ValidationError(format!(
                "{field} contains a reference without a name"
            )));
        }
    }

    if let Some(env) = spec.extra_envs.envs.iter().find(|e| e.name.trim().is_empty()) {
        return Err(Error::ValidationError(format!(
            "extraEnvs.envs contains a variable without a name (value {:?})",
            env.value
        )));
    }

    Ok(())
}
