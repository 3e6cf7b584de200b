//! Platform detection and platform-specific defaults
//!
//! The operator runs either on a vanilla Kubernetes cluster or on a managed
//! platform that serves the `route.openshift.io` API. The platform decides
//! which object exposes the application and which pull secrets apply when
//! nothing else specifies them.

use std::fmt;
use std::str::FromStr;

use kube::Client;
use kube::discovery::Discovery;
use tracing::{info, warn};

use crate::controller::error::Error;

/// API group whose presence identifies the managed platform
pub const ROUTE_API_GROUP: &str = "route.openshift.io";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Vanilla Kubernetes
    #[default]
    Default,
    /// Managed platform with native routes
    ManagedPlatform,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Default => write!(f, "Default"),
            Platform::ManagedPlatform => write!(f, "ManagedPlatform"),
        }
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "kubernetes" | "k8s" => Ok(Platform::Default),
            "managed" | "managedplatform" | "openshift" | "ocp" => Ok(Platform::ManagedPlatform),
            other => Err(Error::InvalidConfig(format!("unknown platform: {other}"))),
        }
    }
}

/// Object kind used to expose the application outside the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExposureKind {
    Route,
    Ingress,
}

/// Defaults that vary with the platform
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformDefaults {
    pub platform: Platform,
    pub exposure_kind: ExposureKind,
    /// Pull secrets used when neither the CR nor the manifest names any
    pub pull_secrets: Vec<String>,
}

impl PlatformDefaults {
    /// Pure lookup of the built-in defaults for a platform
    pub fn resolve(platform: Platform) -> Self {
        match platform {
            Platform::Default => Self {
                platform,
                exposure_kind: ExposureKind::Ingress,
                pull_secrets: Vec::new(),
            },
            Platform::ManagedPlatform => Self {
                platform,
                exposure_kind: ExposureKind::Route,
                pull_secrets: Vec::new(),
            },
        }
    }

    /// Replace the conventional pull secrets of this platform
    pub fn with_pull_secrets(mut self, pull_secrets: Vec<String>) -> Self {
        self.pull_secrets = pull_secrets;
        self
    }

    pub fn supports_routes(&self) -> bool {
        self.exposure_kind == ExposureKind::Route
    }
}

/// Detect the platform by looking for the route API group.
///
/// Discovery failures fall back to [`Platform::Default`].
pub async fn detect(client: &Client) -> Platform {
    match Discovery::new(client.clone())
        .filter(&[ROUTE_API_GROUP])
        .run()
        .await
    {
        Ok(discovery) if discovery.has_group(ROUTE_API_GROUP) => {
            info!(group = ROUTE_API_GROUP, "route API found, using managed platform defaults");
            Platform::ManagedPlatform
        }
        Ok(_) => Platform::Default,
        Err(e) => {
            warn!(error = %e, "API discovery failed, assuming vanilla Kubernetes");
            Platform::Default
        }
    }
}
