//! Service generation for the backend and the local database
//!
//! The backend Service exposes the `http-backend` port of the manifest. The
//! database Service is headless and its name is the `serviceName` of the
//! database StatefulSet.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServiceSpec};

use crate::controller::error::Result;
use crate::model::layering::ResolvedDocument;
use crate::model::spec::NormalizedSpec;
use crate::platform::PlatformDefaults;
use crate::resources::common::{APP_LABEL, BuildContext, app_name, db_name};

/// Generate the backend Service
pub fn build_app_service(
    doc: &ResolvedDocument,
    _spec: &NormalizedSpec,
    _platform: &PlatformDefaults,
    ctx: &BuildContext<'_>,
) -> Result<Option<Service>> {
    let name = app_name(&ctx.cr_name());
    let mut service: Service = doc.parse()?;
    ctx.stamp(&mut service.metadata, name.clone(), "backend");

    let spec = service.spec.get_or_insert_with(ServiceSpec::default);
    spec.selector = Some(BTreeMap::from([(APP_LABEL.to_string(), name)]));

    Ok(Some(service))
}

/// Generate the headless database Service, if the local database is enabled
pub fn build_db_service(
    doc: &ResolvedDocument,
    spec: &NormalizedSpec,
    _platform: &PlatformDefaults,
    ctx: &BuildContext<'_>,
) -> Result<Option<Service>> {
    if !spec.local_db.enabled {
        return Ok(None);
    }

    let name = db_name(&ctx.cr_name());
    let mut service: Service = doc.parse()?;
    ctx.stamp(&mut service.metadata, name.clone(), "database");

    let service_spec = service.spec.get_or_insert_with(ServiceSpec::default);
    service_spec.cluster_ip = Some("None".to_string());
    service_spec.selector = Some(BTreeMap::from([(APP_LABEL.to_string(), name)]));

    Ok(Some(service))
}
