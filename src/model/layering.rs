//! Layered manifest resolution
//!
//! Each object kind the operator manages starts from one YAML document. The
//! built-in document can be replaced by an operator-wide file with the same
//! key, and that in turn by a per-CR raw override. Replacement is always of
//! the whole document; there is no field-level merge at this layer.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::controller::error::{Error, Result};

/// Object kinds backed by a manifest document
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManifestKind {
    Deployment,
    Service,
    AppConfig,
    DynamicPlugins,
    DbSecret,
    DbService,
    DbStatefulSet,
    Route,
    Ingress,
}

impl ManifestKind {
    pub const ALL: [ManifestKind; 9] = [
        ManifestKind::Deployment,
        ManifestKind::Service,
        ManifestKind::AppConfig,
        ManifestKind::DynamicPlugins,
        ManifestKind::DbSecret,
        ManifestKind::DbService,
        ManifestKind::DbStatefulSet,
        ManifestKind::Route,
        ManifestKind::Ingress,
    ];

    /// Stable file name of the document
    pub fn key(&self) -> &'static str {
        match self {
            ManifestKind::Deployment => "deployment.yaml",
            ManifestKind::Service => "service.yaml",
            ManifestKind::AppConfig => "app-config.yaml",
            ManifestKind::DynamicPlugins => "dynamic-plugins.yaml",
            ManifestKind::DbSecret => "db-secret.yaml",
            ManifestKind::DbService => "db-service.yaml",
            ManifestKind::DbStatefulSet => "db-statefulset.yaml",
            ManifestKind::Route => "route.yaml",
            ManifestKind::Ingress => "ingress.yaml",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }

    /// Whether the document belongs to the local database
    pub fn is_database(&self) -> bool {
        matches!(
            self,
            ManifestKind::DbSecret | ManifestKind::DbService | ManifestKind::DbStatefulSet
        )
    }

    fn builtin(&self) -> &'static str {
        match self {
            ManifestKind::Deployment => {
                include_str!("../../config/default-config/deployment.yaml")
            }
            ManifestKind::Service => include_str!("../../config/default-config/service.yaml"),
            ManifestKind::AppConfig => include_str!("../../config/default-config/app-config.yaml"),
            ManifestKind::DynamicPlugins => {
                include_str!("../../config/default-config/dynamic-plugins.yaml")
            }
            ManifestKind::DbSecret => include_str!("../../config/default-config/db-secret.yaml"),
            ManifestKind::DbService => include_str!("../../config/default-config/db-service.yaml"),
            ManifestKind::DbStatefulSet => {
                include_str!("../../config/default-config/db-statefulset.yaml")
            }
            ManifestKind::Route => include_str!("../../config/default-config/route.yaml"),
            ManifestKind::Ingress => include_str!("../../config/default-config/ingress.yaml"),
        }
    }
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Layer a resolved document came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentSource {
    BuiltIn,
    OperatorOverride,
    RawConfig,
}

#[derive(Clone, Debug)]
struct BundleEntry {
    source: DocumentSource,
    text: String,
}

/// Base documents for every kind, after operator-wide overrides
#[derive(Clone, Debug)]
pub struct ManifestBundle {
    documents: BTreeMap<ManifestKind, BundleEntry>,
}

impl ManifestBundle {
    /// Documents compiled into the binary
    pub fn builtin() -> Result<Self> {
        let documents = ManifestKind::ALL
            .into_iter()
            .map(|kind| (kind.key().to_string(), kind.builtin().to_string()));
        Self::from_documents(documents)
    }

    /// Built-in documents with files from `override_dir` replacing them by key
    pub fn load(override_dir: Option<&Path>) -> Result<Self> {
        let mut bundle = Self::builtin()?;
        let Some(dir) = override_dir else {
            return Ok(bundle);
        };

        for kind in ManifestKind::ALL {
            let path = dir.join(kind.key());
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|e| {
                Error::InvalidConfig(format!("failed to read {}: {e}", path.display()))
            })?;
            parse_document(kind.key(), &text)?;
            info!(manifest = kind.key(), path = %path.display(), "using operator-wide manifest override");
            bundle.documents.insert(
                kind,
                BundleEntry {
                    source: DocumentSource::OperatorOverride,
                    text,
                },
            );
        }
        Ok(bundle)
    }

    /// Build a bundle from `(key, document)` pairs; every kind must be present
    pub fn from_documents<I, K, V>(documents: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut entries = BTreeMap::new();
        for (key, text) in documents {
            let key = key.as_ref();
            let kind = ManifestKind::from_key(key)
                .ok_or_else(|| Error::InvalidConfig(format!("unknown manifest key: {key}")))?;
            let text = text.into();
            parse_document(key, &text)?;
            entries.insert(
                kind,
                BundleEntry {
                    source: DocumentSource::BuiltIn,
                    text,
                },
            );
        }

        if let Some(missing) = ManifestKind::ALL
            .into_iter()
            .find(|kind| !entries.contains_key(kind))
        {
            return Err(Error::MissingManifest(missing.key().to_string()));
        }

        Ok(Self { documents: entries })
    }

    pub fn document(&self, kind: ManifestKind) -> Option<&str> {
        self.documents.get(&kind).map(|e| e.text.as_str())
    }
}

/// A single document after all layers were applied
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedDocument {
    pub kind: ManifestKind,
    pub source: DocumentSource,
    pub value: serde_yaml::Value,
}

impl ResolvedDocument {
    /// Parse the document into a typed object
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_yaml::from_value(self.value.clone()).map_err(|e| Error::ConfigParseError {
            key: self.kind.key().to_string(),
            message: e.to_string(),
        })
    }
}

/// Bundle plus the per-CR raw overrides for one pass
#[derive(Clone, Debug)]
pub struct ConfigLayers<'a> {
    bundle: &'a ManifestBundle,
    raw_config: &'a BTreeMap<String, String>,
}

impl<'a> ConfigLayers<'a> {
    pub fn new(bundle: &'a ManifestBundle, raw_config: &'a BTreeMap<String, String>) -> Self {
        Self { bundle, raw_config }
    }

    /// Resolve the document for `kind`; the last layer that has it wins
    pub fn resolve(&self, kind: ManifestKind) -> Result<ResolvedDocument> {
        let (source, text) = match self.raw_config.get(kind.key()) {
            Some(text) => (DocumentSource::RawConfig, text.as_str()),
            None => {
                let entry = self
                    .bundle
                    .documents
                    .get(&kind)
                    .ok_or_else(|| Error::MissingManifest(kind.key().to_string()))?;
                (entry.source, entry.text.as_str())
            }
        };

        debug!(manifest = kind.key(), ?source, "resolved manifest");
        Ok(ResolvedDocument {
            kind,
            source,
            value: parse_document(kind.key(), text)?,
        })
    }
}

/// Parse a document and require a YAML mapping at the top level
fn parse_document(key: &str, text: &str) -> Result<serde_yaml::Value> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| Error::ConfigParseError {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    if !value.is_mapping() {
        return Err(Error::ConfigParseError {
            key: key.to_string(),
            message: "document is not a YAML mapping".to_string(),
        });
    }
    Ok(value)
}
