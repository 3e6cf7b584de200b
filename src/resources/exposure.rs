//! Route and Ingress generation
//!
//! Exactly one exposure kind exists per platform: routes on the managed
//! platform, ingresses on vanilla clusters.

use k8s_openapi::api::networking::v1::{Ingress, IngressSpec};

use crate::controller::error::Result;
use crate::crd::{OpenShiftRoute, TlsConfig};
use crate::model::layering::ResolvedDocument;
use crate::model::spec::NormalizedSpec;
use crate::platform::PlatformDefaults;
use crate::resources::common::{BuildContext, app_name};

/// Generate the Route, if the platform serves routes and it is enabled
pub fn build_route(
    doc: &ResolvedDocument,
    spec: &NormalizedSpec,
    platform: &PlatformDefaults,
    ctx: &BuildContext<'_>,
) -> Result<Option<OpenShiftRoute>> {
    if !platform.supports_routes() || !spec.route.enabled() {
        return Ok(None);
    }

    let name = app_name(&ctx.cr_name());
    let mut route: OpenShiftRoute = doc.parse()?;
    ctx.stamp(&mut route.metadata, name.clone(), "backend");

    route.spec.to.kind = "Service".to_string();
    route.spec.to.name = name;
    if let Some(host) = &spec.route.host {
        route.spec.host = Some(host.clone());
    }
    if let Some(subdomain) = &spec.route.subdomain {
        route.spec.subdomain = Some(subdomain.clone());
    }
    if let Some(tls) = &spec.route.tls {
        let target = route.spec.tls.get_or_insert_with(|| TlsConfig {
            termination: "edge".to_string(),
            ..Default::default()
        });
        if tls.certificate.is_some() {
            target.certificate = tls.certificate.clone();
        }
        if tls.key.is_some() {
            target.key = tls.key.clone();
        }
        if tls.ca_certificate.is_some() {
            target.ca_certificate = tls.ca_certificate.clone();
        }
    }

    Ok(Some(route))
}

/// Generate the Ingress, if the platform uses ingresses and it is enabled
pub fn build_ingress(
    doc: &ResolvedDocument,
    spec: &NormalizedSpec,
    platform: &PlatformDefaults,
    ctx: &BuildContext<'_>,
) -> Result<Option<Ingress>> {
    if platform.supports_routes() || !spec.ingress.enabled {
        return Ok(None);
    }

    let name = app_name(&ctx.cr_name());
    let mut ingress: Ingress = doc.parse()?;
    ctx.stamp(&mut ingress.metadata, name.clone(), "backend");

    let ingress_spec = ingress.spec.get_or_insert_with(IngressSpec::default);
    if let Some(class_name) = &spec.ingress.class_name {
        ingress_spec.ingress_class_name = Some(class_name.clone());
    }
    for rule in ingress_spec.rules.iter_mut().flatten() {
        if let Some(host) = &spec.ingress.host {
            rule.host = Some(host.clone());
        }
        for path in rule.http.iter_mut().flat_map(|http| http.paths.iter_mut()) {
            if let Some(service) = path.backend.service.as_mut() {
                service.name = name.clone();
            }
        }
    }

    Ok(Some(ingress))
}
