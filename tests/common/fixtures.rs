//! Test fixtures and builders for Backstage resources
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let bs = create_test_backstage("bs1", "default");
//! let bs = BackstageBuilder::new("bs1", "default")
//!     .without_local_db()
//!     .with_pull_secrets(&["my-secret1", "my-secret2"])
//!     .build();
//! ```

use backstage_operator::config::ImageOverrides;
use backstage_operator::crd::{
    AppConfig, Application, Backstage, BackstageSpec, Database, DynamicPlugin, Env, ExtraEnvs,
    ExtraFiles, FileObjectRef, ObjectKeyRef, Route, RuntimeConfig,
};
use backstage_operator::model::layering::ManifestBundle;
use backstage_operator::model::{ExternalConfig, ModelInputs, ResolvedModel, build_model};
use backstage_operator::platform::{Platform, PlatformDefaults};
use kube::core::ObjectMeta;

/// UID stamped on every fixture so owner references resolve
pub const TEST_UID: &str = "test-uid-12345";

/// A Backstage with every optional structure unset
pub fn create_test_backstage(name: &str, namespace: &str) -> Backstage {
    BackstageBuilder::new(name, namespace).build()
}

/// Builder for Backstage test resources
#[derive(Clone, Debug)]
pub struct BackstageBuilder {
    name: String,
    namespace: String,
    uid: Option<String>,
    spec: BackstageSpec,
}

impl BackstageBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: Some(TEST_UID.to_string()),
            spec: BackstageSpec::default(),
        }
    }

    fn application(&mut self) -> &mut Application {
        self.spec.application.get_or_insert_with(Application::default)
    }

    fn database(&mut self) -> &mut Database {
        self.spec.database.get_or_insert_with(Database::default)
    }

    pub fn with_local_db(mut self, enabled: bool) -> Self {
        self.database().enable_local_db = Some(enabled);
        self
    }

    pub fn without_local_db(self) -> Self {
        self.with_local_db(false)
    }

    pub fn with_auth_secret(mut self, name: &str) -> Self {
        self.database().auth_secret_name = Some(name.to_string());
        self
    }

    pub fn with_pull_secrets(mut self, names: &[&str]) -> Self {
        self.application().image_pull_secrets =
            Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.application().image = Some(image.to_string());
        self
    }

    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.application().replicas = Some(replicas);
        self
    }

    pub fn with_route(mut self, enabled: bool) -> Self {
        let route = self.application().route.get_or_insert_with(Route::default);
        route.enabled = Some(enabled);
        self
    }

    pub fn with_route_subdomain(mut self, subdomain: &str) -> Self {
        let route = self.application().route.get_or_insert_with(Route::default);
        route.subdomain = Some(subdomain.to_string());
        self
    }

    pub fn with_app_config(mut self, config_map: &str, key: Option<&str>) -> Self {
        self.application()
            .app_config
            .get_or_insert_with(AppConfig::default)
            .config_maps
            .push(ObjectKeyRef {
                name: config_map.to_string(),
                key: key.map(String::from),
            });
        self
    }

    pub fn with_extra_file_secret(mut self, secret: &str, key: Option<&str>) -> Self {
        self.application()
            .extra_files
            .get_or_insert_with(ExtraFiles::default)
            .secrets
            .push(FileObjectRef {
                name: secret.to_string(),
                key: key.map(String::from),
                mount_path: None,
            });
        self
    }

    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        self.application()
            .extra_envs
            .get_or_insert_with(ExtraEnvs::default)
            .envs
            .push(Env {
                name: name.to_string(),
                value: value.to_string(),
            });
        self
    }

    pub fn with_env_secret(mut self, secret: &str, key: Option<&str>) -> Self {
        self.application()
            .extra_envs
            .get_or_insert_with(ExtraEnvs::default)
            .secrets
            .push(ObjectKeyRef {
                name: secret.to_string(),
                key: key.map(String::from),
            });
        self
    }

    pub fn with_plugin(mut self, package: &str, disabled: bool) -> Self {
        self.application()
            .dynamic_plugins
            .get_or_insert_with(Vec::new)
            .push(DynamicPlugin {
                package: package.to_string(),
                integrity: None,
                disabled,
                plugin_config: None,
            });
        self
    }

    pub fn with_plugins_config_map(mut self, name: &str) -> Self {
        self.application().dynamic_plugins_config_map_name = Some(name.to_string());
        self
    }

    pub fn with_raw_config(mut self, backstage: Option<&str>, local_db: Option<&str>) -> Self {
        self.spec.raw_runtime_config = Some(RuntimeConfig {
            backstage_config: backstage.map(String::from),
            local_db_config: local_db.map(String::from),
        });
        self
    }

    pub fn without_uid(mut self) -> Self {
        self.uid = None;
        self
    }

    pub fn build(self) -> Backstage {
        Backstage {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                uid: self.uid,
                generation: Some(1),
                ..Default::default()
            },
            spec: self.spec,
            status: None,
        }
    }
}

/// Everything [`build_model`] needs besides the CR
pub struct ModelFixture {
    pub bundle: ManifestBundle,
    pub external: ExternalConfig,
    pub platform: PlatformDefaults,
    pub images: ImageOverrides,
}

impl ModelFixture {
    pub fn new(platform: Platform) -> Self {
        Self {
            bundle: ManifestBundle::builtin().unwrap(),
            external: ExternalConfig::default(),
            platform: PlatformDefaults::resolve(platform),
            images: ImageOverrides::default(),
        }
    }

    /// Override one manifest for this fixture, as a raw runtime config would
    pub fn with_raw_document(mut self, key: &str, document: &str) -> Self {
        self.external
            .raw_config
            .insert(key.to_string(), document.to_string());
        self
    }

    pub fn with_db_image(mut self, image: &str) -> Self {
        self.images.local_db = Some(image.to_string());
        self
    }

    pub fn inputs(&self) -> ModelInputs<'_> {
        ModelInputs {
            bundle: &self.bundle,
            external: &self.external,
            platform: &self.platform,
            images: &self.images,
        }
    }

    pub fn build(&self, backstage: &Backstage) -> ResolvedModel {
        build_model(backstage, &self.inputs()).unwrap()
    }
}

/// Load a file from `tests/testdata`
pub fn testdata(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/testdata")
        .join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{}: {e}", path.display()))
}
