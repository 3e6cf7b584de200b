//! Normalized view of the Backstage CR
//!
//! Optional CR fields are resolved to their defaults here so the object
//! builders never have to reason about absence.

use crate::crd::{BackstageSpec, DynamicPlugin, Env, FileObjectRef, ObjectKeyRef};

/// Default directory for app-config and extra file mounts
pub const DEFAULT_MOUNT_PATH: &str = "/opt/app-root/src";

/// Image pull secrets as requested by the CR
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PullSecrets {
    /// Not set: the manifest (or platform) decides
    #[default]
    Unset,
    /// Set, possibly empty: replaces every other source
    Explicit(Vec<String>),
}

impl PullSecrets {
    pub fn explicit(&self) -> Option<&[String]> {
        match self {
            PullSecrets::Unset => None,
            PullSecrets::Explicit(names) => Some(names),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalDbSettings {
    pub enabled: bool,
    /// User-owned credentials Secret replacing the generated one
    pub auth_secret_name: Option<String>,
}

impl Default for LocalDbSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            auth_secret_name: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteSettings {
    /// Value set in the CR, if any
    pub requested: Option<bool>,
    pub host: Option<String>,
    pub subdomain: Option<String>,
    pub tls: Option<RouteTlsSettings>,
}

impl RouteSettings {
    pub fn enabled(&self) -> bool {
        self.requested.unwrap_or(true)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteTlsSettings {
    pub certificate: Option<String>,
    pub key: Option<String>,
    pub ca_certificate: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngressSettings {
    pub enabled: bool,
    pub host: Option<String>,
    pub class_name: Option<String>,
}

/// A ConfigMap or Secret mounted as files
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMount {
    pub name: String,
    pub key: Option<String>,
    pub mount_path: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfigSettings {
    pub mount_path: String,
    pub config_maps: Vec<ObjectKeyRef>,
}

impl Default for AppConfigSettings {
    fn default() -> Self {
        Self {
            mount_path: DEFAULT_MOUNT_PATH.to_string(),
            config_maps: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtraFileSettings {
    pub config_maps: Vec<FileMount>,
    pub secrets: Vec<FileMount>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtraEnvSettings {
    pub envs: Vec<Env>,
    pub config_maps: Vec<ObjectKeyRef>,
    pub secrets: Vec<ObjectKeyRef>,
}

/// Where the dynamic-plugins document comes from
#[derive(Clone, Debug, Default, PartialEq)]
pub enum DynamicPluginsSource {
    /// Operator-generated ConfigMap from the manifest document
    #[default]
    Default,
    /// Operator-generated ConfigMap with these plugins appended
    Inline(Vec<DynamicPlugin>),
    /// User-owned ConfigMap mounted as is
    ConfigMap(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawConfigRefs {
    pub backstage_config: Option<String>,
    pub local_db_config: Option<String>,
}

/// The CR with every default applied
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizedSpec {
    pub local_db: LocalDbSettings,
    pub image: Option<String>,
    pub replicas: Option<i32>,
    pub pull_secrets: PullSecrets,
    pub route: RouteSettings,
    pub ingress: IngressSettings,
    pub app_config: AppConfigSettings,
    pub extra_files: ExtraFileSettings,
    pub extra_envs: ExtraEnvSettings,
    pub dynamic_plugins: DynamicPluginsSource,
    pub raw_config: RawConfigRefs,
}

/// Translate the CR spec into its normalized form
pub fn translate(spec: &BackstageSpec) -> NormalizedSpec {
    let mut normalized = NormalizedSpec::default();

    if let Some(db) = &spec.database {
        normalized.local_db = LocalDbSettings {
            enabled: db.enable_local_db.unwrap_or(true),
            auth_secret_name: non_empty(db.auth_secret_name.as_deref()),
        };
    }

    if let Some(raw) = &spec.raw_runtime_config {
        normalized.raw_config = RawConfigRefs {
            backstage_config: non_empty(raw.backstage_config.as_deref()),
            local_db_config: non_empty(raw.local_db_config.as_deref()),
        };
    }

    let Some(app) = &spec.application else {
        return normalized;
    };

    normalized.image = non_empty(app.image.as_deref());
    normalized.replicas = app.replicas;
    normalized.pull_secrets = match &app.image_pull_secrets {
        Some(names) => PullSecrets::Explicit(names.clone()),
        None => PullSecrets::Unset,
    };

    if let Some(route) = &app.route {
        normalized.route = RouteSettings {
            requested: route.enabled,
            host: non_empty(route.host.as_deref()),
            subdomain: non_empty(route.subdomain.as_deref()),
            tls: route.tls.as_ref().map(|tls| RouteTlsSettings {
                certificate: tls.certificate.clone(),
                key: tls.key.clone(),
                ca_certificate: tls.ca_certificate.clone(),
            }),
        };
    }

    if let Some(ingress) = &app.ingress {
        normalized.ingress = IngressSettings {
            enabled: ingress.enabled.unwrap_or(false),
            host: non_empty(ingress.host.as_deref()),
            class_name: non_empty(ingress.class_name.as_deref()),
        };
    }

    if let Some(app_config) = &app.app_config {
        normalized.app_config = AppConfigSettings {
            mount_path: mount_path_or_default(app_config.mount_path.as_deref()),
            config_maps: app_config.config_maps.clone(),
        };
    }

    if let Some(files) = &app.extra_files {
        let base = mount_path_or_default(files.mount_path.as_deref());
        normalized.extra_files = ExtraFileSettings {
            config_maps: files.config_maps.iter().map(|r| file_mount(r, &base)).collect(),
            secrets: files.secrets.iter().map(|r| file_mount(r, &base)).collect(),
        };
    }

    if let Some(envs) = &app.extra_envs {
        normalized.extra_envs = ExtraEnvSettings {
            envs: envs.envs.clone(),
            config_maps: envs.config_maps.clone(),
            secrets: envs.secrets.clone(),
        };
    }

    normalized.dynamic_plugins = match (
        non_empty(app.dynamic_plugins_config_map_name.as_deref()),
        &app.dynamic_plugins,
    ) {
        (Some(name), _) => DynamicPluginsSource::ConfigMap(name),
        (None, Some(plugins)) if !plugins.is_empty() => {
            DynamicPluginsSource::Inline(plugins.clone())
        }
        _ => DynamicPluginsSource::Default,
    };

    normalized
}

fn file_mount(reference: &FileObjectRef, base: &str) -> FileMount {
    FileMount {
        name: reference.name.clone(),
        key: non_empty(reference.key.as_deref()),
        mount_path: reference
            .mount_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(base)
            .to_string(),
    }
}

fn mount_path_or_default(path: Option<&str>) -> String {
    non_empty(path).unwrap_or_else(|| DEFAULT_MOUNT_PATH.to_string())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).map(String::from)
}
