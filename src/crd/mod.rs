mod backstage;
mod route;

pub use backstage::*;
pub use route::{OpenShiftRoute, OpenShiftRouteSpec, RoutePort, RouteTargetReference, TlsConfig};
