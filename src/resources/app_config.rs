//! Operator-generated ConfigMaps: default app-config and dynamic plugins

use k8s_openapi::api::core::v1::ConfigMap;
use serde_yaml::{Mapping, Value};

use crate::controller::error::{Error, Result};
use crate::model::layering::ResolvedDocument;
use crate::model::spec::{DynamicPluginsSource, NormalizedSpec};
use crate::platform::PlatformDefaults;
use crate::resources::common::{BuildContext, app_config_name, dynamic_plugins_name};

/// Key of the default app-config inside the generated ConfigMap
pub const DEFAULT_APP_CONFIG_KEY: &str = "default.app-config.yaml";

/// Key of the plugin list inside the dynamic plugins ConfigMap
pub const DYNAMIC_PLUGINS_KEY: &str = "dynamic-plugins.yaml";

/// Generate the default app-config ConfigMap
pub fn build_app_config(
    doc: &ResolvedDocument,
    _spec: &NormalizedSpec,
    _platform: &PlatformDefaults,
    ctx: &BuildContext<'_>,
) -> Result<Option<ConfigMap>> {
    let mut config_map: ConfigMap = doc.parse()?;
    let has_key = config_map
        .data
        .as_ref()
        .is_some_and(|data| data.contains_key(DEFAULT_APP_CONFIG_KEY));
    if !has_key {
        return Err(Error::ConfigParseError {
            key: doc.kind.key().to_string(),
            message: format!("ConfigMap has no {DEFAULT_APP_CONFIG_KEY} key"),
        });
    }

    ctx.stamp(&mut config_map.metadata, app_config_name(&ctx.cr_name()), "backend");
    Ok(Some(config_map))
}

/// Generate the dynamic plugins ConfigMap.
///
/// Plugins listed in the CR are merged into the document's `plugins` list,
/// replacing entries with the same package. Nothing is generated when the
/// CR points at a ConfigMap of its own.
pub fn build_dynamic_plugins(
    doc: &ResolvedDocument,
    spec: &NormalizedSpec,
    _platform: &PlatformDefaults,
    ctx: &BuildContext<'_>,
) -> Result<Option<ConfigMap>> {
    let plugins = match &spec.dynamic_plugins {
        DynamicPluginsSource::ConfigMap(_) => return Ok(None),
        DynamicPluginsSource::Default => &[][..],
        DynamicPluginsSource::Inline(plugins) => plugins.as_slice(),
    };

    let mut config_map: ConfigMap = doc.parse()?;
    let parse_error = |message: String| Error::ConfigParseError {
        key: doc.kind.key().to_string(),
        message,
    };

    let data = config_map.data.get_or_insert_with(Default::default);
    let current = data.get(DYNAMIC_PLUGINS_KEY).map(String::as_str).unwrap_or("");

    if !plugins.is_empty() {
        let mut document: Value = if current.trim().is_empty() {
            Value::Mapping(Mapping::new())
        } else {
            serde_yaml::from_str(current).map_err(|e| parse_error(e.to_string()))?
        };
        let root = document
            .as_mapping_mut()
            .ok_or_else(|| parse_error(format!("{DYNAMIC_PLUGINS_KEY} is not a mapping")))?;
        let entries = root
            .entry(Value::from("plugins"))
            .or_insert_with(|| Value::Sequence(Vec::new()));
        if entries.is_null() {
            *entries = Value::Sequence(Vec::new());
        }
        let entries = entries
            .as_sequence_mut()
            .ok_or_else(|| parse_error("plugins is not a list".to_string()))?;

        for plugin in plugins {
            let value =
                serde_yaml::to_value(plugin).map_err(|e| parse_error(e.to_string()))?;
            let existing = entries.iter_mut().find(|entry| {
                entry.get("package").and_then(Value::as_str) == Some(plugin.package.as_str())
            });
            match existing {
                Some(entry) => *entry = value,
                None => entries.push(value),
            }
        }

        let rendered = serde_yaml::to_string(&document).map_err(|e| parse_error(e.to_string()))?;
        data.insert(DYNAMIC_PLUGINS_KEY.to_string(), rendered);
    }

    ctx.stamp(
        &mut config_map.metadata,
        dynamic_plugins_name(&ctx.cr_name()),
        "backend",
    );
    Ok(Some(config_map))
}
