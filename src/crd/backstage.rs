use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Backstage is the Schema for the backstages API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "rhdh.redhat.com",
    version = "v1alpha4",
    kind = "Backstage",
    plural = "backstages",
    shortname = "bs",
    namespaced,
    status = "BackstageStatus",
    printcolumn = r#"{"name":"Deployed", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Deployed\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackstageSpec {
    /// Configuration for the Backstage application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<Application>,

    /// Configuration for the local PostgreSQL database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<Database>,

    /// ConfigMaps holding whole-document overrides of the default manifests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_runtime_config: Option<RuntimeConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    /// app-config files mounted into the backend and passed with `--config`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_config: Option<AppConfig>,

    /// Extra files mounted into the backend container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_files: Option<ExtraFiles>,

    /// Extra environment variables injected into the backend container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_envs: Option<ExtraEnvs>,

    /// Dynamic plugins to install at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_plugins: Option<Vec<DynamicPlugin>>,

    /// Name of a user-owned ConfigMap holding `dynamic-plugins.yaml`.
    /// Takes precedence over `dynamicPlugins`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_plugins_config_map_name: Option<String>,

    /// Number of backend replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Backend container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image pull secrets for every workload of the instance.
    /// An empty list clears the defaults; leaving it unset keeps them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secrets: Option<Vec<String>>,

    /// Route exposure (managed platform only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,

    /// Ingress exposure (vanilla clusters only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Ingress>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<ObjectKeyRef>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtraFiles {
    /// Default directory for mounted files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<FileObjectRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<FileObjectRef>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtraEnvs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<Env>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<ObjectKeyRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<ObjectKeyRef>,
}

/// Reference to a ConfigMap or Secret, optionally narrowed to one key
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectKeyRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Reference to a ConfigMap or Secret mounted as files
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileObjectRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Overrides the `extraFiles.mountPath` for this object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Env {
    pub name: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DynamicPlugin {
    /// Package reference (npm package, OCI artifact or local path)
    pub package: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,

    #[serde(default)]
    pub disabled: bool,

    /// Plugin configuration merged into the app-config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_config: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Defaults to true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTls>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ingress {
    /// Defaults to false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    /// Deploy a local PostgreSQL StatefulSet (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_local_db: Option<bool>,

    /// Secret with POSTGRES_* credentials. When set, no Secret is generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// ConfigMap whose keys replace the application manifests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backstage_config: Option<String>,

    /// ConfigMap whose keys replace the database manifests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_db_config: Option<String>,
}

/// Status of the Backstage instance
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackstageStatus {
    /// Kubernetes-style conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Backstage {
    /// Condition of the given type, if present
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.type_ == type_))
    }
}
