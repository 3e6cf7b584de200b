//! Process-wide operator configuration
//!
//! Everything the operator reads from its environment is parsed once at
//! startup into [`OperatorConfig`] and handed to the reconciler explicitly.

use std::num::{NonZeroU16, NonZeroU64};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::controller::error::{Error, Result};
use crate::platform::Platform;

/// Database image override
pub const LOCAL_DB_IMAGE_ENV: &str = "RELATED_IMAGE_postgresql";
/// Backstage backend image override
pub const BACKSTAGE_IMAGE_ENV: &str = "RELATED_IMAGE_backstage";
/// Platform signal (`default`, `kubernetes`, `managed`, `openshift`)
pub const PLATFORM_ENV: &str = "BACKSTAGE_PLATFORM";
/// Directory with operator-wide manifest overrides
pub const DEFAULT_CONFIG_DIR_ENV: &str = "DEFAULT_CONFIG_DIR";
/// Comma separated pull secrets used when neither CR nor manifest set any
pub const DEFAULT_PULL_SECRETS_ENV: &str = "DEFAULT_IMAGE_PULL_SECRETS";
/// Restrict the operator to a single namespace
pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";
/// Seconds between periodic reconciliations
pub const REQUEUE_SECONDS_ENV: &str = "RECONCILE_REQUEUE_SECONDS";
/// Upper bound of reconciliations running in parallel
pub const CONCURRENCY_ENV: &str = "MAX_CONCURRENT_RECONCILES";

const DEFAULT_REQUEUE_SECONDS: u64 = 60;
const DEFAULT_CONCURRENCY: u16 = 4;

/// Container image overrides supplied by the environment
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageOverrides {
    /// Overrides the database container image
    pub local_db: Option<String>,
    /// Overrides the backend container image (a CR-level image still wins)
    pub backstage: Option<String>,
}

/// Operator configuration resolved at startup
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Explicit platform; `None` means detect from API discovery
    pub platform: Option<Platform>,
    pub images: ImageOverrides,
    pub default_config_dir: Option<PathBuf>,
    pub default_pull_secrets: Vec<String>,
    pub watch_namespace: Option<String>,
    pub requeue_interval: Duration,
    pub concurrency: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            platform: None,
            images: ImageOverrides::default(),
            default_config_dir: None,
            default_pull_secrets: Vec::new(),
            watch_namespace: None,
            requeue_interval: Duration::from_secs(DEFAULT_REQUEUE_SECONDS),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl OperatorConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let platform = var(PLATFORM_ENV)
            .map(|v| Platform::from_str(&v))
            .transpose()?;

        let requeue_interval = match var(REQUEUE_SECONDS_ENV) {
            Some(v) => Duration::from_secs(positive::<NonZeroU64>(REQUEUE_SECONDS_ENV, &v)?.get()),
            None => Duration::from_secs(DEFAULT_REQUEUE_SECONDS),
        };

        let concurrency = match var(CONCURRENCY_ENV) {
            Some(v) => positive::<NonZeroU16>(CONCURRENCY_ENV, &v)?.get(),
            None => DEFAULT_CONCURRENCY,
        };

        let default_pull_secrets = var(DEFAULT_PULL_SECRETS_ENV)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            platform,
            images: ImageOverrides {
                local_db: var(LOCAL_DB_IMAGE_ENV),
                backstage: var(BACKSTAGE_IMAGE_ENV),
            },
            default_config_dir: var(DEFAULT_CONFIG_DIR_ENV).map(PathBuf::from),
            default_pull_secrets,
            watch_namespace: var(WATCH_NAMESPACE_ENV),
            requeue_interval,
            concurrency,
        })
    }
}

/// Zero would disable periodic requeues or stall the controller
fn positive<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{key} must be a positive integer: {value}")))
}
