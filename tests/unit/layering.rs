//! Unit tests for manifest layering

use std::collections::BTreeMap;

use backstage_operator::controller::Error;
use backstage_operator::model::layering::{
    ConfigLayers, DocumentSource, ManifestBundle, ManifestKind,
};

use crate::common::*;

fn builtin_documents() -> Vec<(String, String)> {
    let bundle = ManifestBundle::builtin().unwrap();
    ManifestKind::ALL
        .into_iter()
        .map(|kind| {
            (
                kind.key().to_string(),
                bundle.document(kind).unwrap().to_string(),
            )
        })
        .collect()
}

#[test]
fn test_builtin_bundle_covers_every_kind() {
    let bundle = ManifestBundle::builtin().unwrap();
    for kind in ManifestKind::ALL {
        assert!(bundle.document(kind).is_some(), "{kind} missing");
    }
}

#[test]
fn test_missing_document_is_fatal() {
    let documents = builtin_documents()
        .into_iter()
        .filter(|(key, _)| key != "db-service.yaml");

    let err = ManifestBundle::from_documents(documents).unwrap_err();
    assert!(matches!(err, Error::MissingManifest(ref key) if key == "db-service.yaml"));
}

#[test]
fn test_unknown_key_rejected() {
    let mut documents = builtin_documents();
    documents.push(("pvc.yaml".to_string(), "kind: PersistentVolumeClaim".to_string()));

    let err = ManifestBundle::from_documents(documents).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_non_mapping_document_rejected() {
    let documents = builtin_documents().into_iter().map(|(key, text)| {
        if key == "service.yaml" {
            (key, "- just\n- a\n- list\n".to_string())
        } else {
            (key, text)
        }
    });

    let err = ManifestBundle::from_documents(documents).unwrap_err();
    assert!(matches!(err, Error::ConfigParseError { .. }));
}

#[test]
fn test_raw_config_replaces_whole_document() {
    let bundle = ManifestBundle::builtin().unwrap();
    let raw = BTreeMap::from([(
        "db-statefulset.yaml".to_string(),
        testdata("ips-db-statefulset.yaml"),
    )]);
    let layers = ConfigLayers::new(&bundle, &raw);

    let db = layers.resolve(ManifestKind::DbStatefulSet).unwrap();
    assert_eq!(db.source, DocumentSource::RawConfig);
    let text = serde_yaml::to_string(&db.value).unwrap();
    assert!(text.contains("ips-db1"));

    let deploy = layers.resolve(ManifestKind::Deployment).unwrap();
    assert_eq!(deploy.source, DocumentSource::BuiltIn);
}

#[test]
fn test_malformed_raw_config_surfaces_on_resolve() {
    let bundle = ManifestBundle::builtin().unwrap();
    let raw = BTreeMap::from([(
        "deployment.yaml".to_string(),
        testdata("malformed-deployment.yaml"),
    )]);
    let layers = ConfigLayers::new(&bundle, &raw);

    assert!(matches!(
        layers.resolve(ManifestKind::Deployment),
        Err(Error::ConfigParseError { .. })
    ));
    assert!(layers.resolve(ManifestKind::Service).is_ok());
}

#[test]
fn test_override_directory_replaces_by_key() {
    let dir = std::env::temp_dir().join(format!("backstage-operator-layering-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("service.yaml"), "apiVersion: v1\nkind: Service\nmetadata:\n  name: custom\n")
        .unwrap();

    let bundle = ManifestBundle::load(Some(&dir)).unwrap();
    let overrides = BTreeMap::new();
    let layers = ConfigLayers::new(&bundle, &overrides);
    let service = layers.resolve(ManifestKind::Service).unwrap();
    assert_eq!(service.source, DocumentSource::OperatorOverride);
    assert_eq!(
        layers.resolve(ManifestKind::Route).unwrap().source,
        DocumentSource::BuiltIn
    );

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_no_override_directory_is_builtin() {
    let loaded = ManifestBundle::load(None).unwrap();
    let builtin = ManifestBundle::builtin().unwrap();
    for kind in ManifestKind::ALL {
        assert_eq!(loaded.document(kind), builtin.document(kind));
    }
}
