//! Local database StatefulSet generation

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{EnvFromSource, SecretEnvSource};

use crate::controller::error::{Error, Result};
use crate::model::layering::ResolvedDocument;
use crate::model::spec::NormalizedSpec;
use crate::platform::PlatformDefaults;
use crate::resources::common::{
    BuildContext, apply_pull_secrets, db_name, db_secret_name, main_container, resolve_image,
    select_pods,
};

/// Name of the database container in the manifest
pub const DB_CONTAINER: &str = "postgresql";

/// Image used when neither the environment nor the manifest set one
pub const FALLBACK_DB_IMAGE: &str = "quay.io/fedora/postgresql-15:latest";

/// Generate the database StatefulSet, if the local database is enabled.
///
/// `spec.serviceName` always equals the name of the headless database
/// Service.
pub fn build_db_statefulset(
    doc: &ResolvedDocument,
    spec: &NormalizedSpec,
    platform: &PlatformDefaults,
    ctx: &BuildContext<'_>,
) -> Result<Option<StatefulSet>> {
    if !spec.local_db.enabled {
        return Ok(None);
    }

    let cr_name = ctx.cr_name();
    let name = db_name(&cr_name);
    let mut statefulset: StatefulSet = doc.parse()?;
    ctx.stamp(&mut statefulset.metadata, name.clone(), "database");

    let sts_spec = statefulset.spec.get_or_insert_with(StatefulSetSpec::default);
    sts_spec.service_name = Some(name.clone());
    select_pods(&mut sts_spec.selector, &mut sts_spec.template.metadata, &name);

    let pod = sts_spec
        .template
        .spec
        .as_mut()
        .ok_or_else(|| Error::ConfigParseError {
            key: doc.kind.key().to_string(),
            message: "pod template has no spec".to_string(),
        })?;
    apply_pull_secrets(pod, spec, platform);

    let container =
        main_container(&mut pod.containers, DB_CONTAINER).ok_or_else(|| Error::ConfigParseError {
            key: doc.kind.key().to_string(),
            message: format!("no {DB_CONTAINER} container"),
        })?;
    container.image = Some(resolve_image(
        &[ctx.images.local_db.as_deref()],
        container.image.as_deref(),
        FALLBACK_DB_IMAGE,
    ));

    let credentials = spec
        .local_db
        .auth_secret_name
        .clone()
        .unwrap_or_else(|| db_secret_name(&cr_name));
    let env_from = container.env_from.get_or_insert_with(Vec::new);
    if !env_from
        .iter()
        .any(|e| e.secret_ref.as_ref().is_some_and(|s| s.name == credentials))
    {
        env_from.push(EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: credentials,
                optional: None,
            }),
            ..Default::default()
        });
    }

    Ok(Some(statefulset))
}
