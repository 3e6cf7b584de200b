//! In-memory [`ClusterClient`] that counts every write
//!
//! Applied objects are stored the way an API server would return them: with
//! a resource version, a status stanza and without empty lists. A second pass
//! therefore sees the annotations written by the first one next to fields the
//! operator never sent.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use backstage_operator::controller::ClusterClient;
use backstage_operator::controller::error::{Error, Result};
use backstage_operator::crd::BackstageStatus;
use backstage_operator::model::{ObjectIdentity, ObjectKind};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::DynamicObject;
use parking_lot::Mutex;
use serde_json::{Value, json};

#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<ObjectIdentity, DynamicObject>>,
    config_maps: Mutex<BTreeMap<String, ConfigMap>>,
    statuses: Mutex<BTreeMap<String, BackstageStatus>>,
    /// Kind whose applies fail with a server error
    failing_kind: Mutex<Option<ObjectKind>>,
    pub applies: AtomicUsize,
    pub deletes: AtomicUsize,
    pub status_patches: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user-owned ConfigMap readable through `get_config_map`
    pub fn with_config_map(self, name: &str, data: &[(&str, &str)]) -> Self {
        let config_map = ConfigMap {
            metadata: kube::core::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        };
        self.config_maps.lock().insert(name.to_string(), config_map);
        self
    }

    /// Seed an object as if someone else had created it
    pub fn insert(&self, kind: ObjectKind, object: DynamicObject) {
        let name = object.metadata.name.clone().unwrap_or_default();
        self.objects
            .lock()
            .insert(ObjectIdentity::new(kind, name), object);
    }

    pub fn fail_applies_of(&self, kind: ObjectKind) {
        *self.failing_kind.lock() = Some(kind);
    }

    pub fn heal(&self) {
        *self.failing_kind.lock() = None;
    }

    pub fn get(&self, kind: ObjectKind, name: &str) -> Option<DynamicObject> {
        self.objects
            .lock()
            .get(&ObjectIdentity::new(kind, name))
            .cloned()
    }

    pub fn contains(&self, kind: ObjectKind, name: &str) -> bool {
        self.get(kind, name).is_some()
    }

    pub fn identities(&self) -> Vec<ObjectIdentity> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn status(&self, name: &str) -> Option<BackstageStatus> {
        self.statuses.lock().get(name).cloned()
    }

    /// Number of writes (applies plus deletes) seen so far
    pub fn writes(&self) -> usize {
        self.applies.load(Ordering::SeqCst) + self.deletes.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.applies.store(0, Ordering::SeqCst);
        self.deletes.store(0, Ordering::SeqCst);
        self.status_patches.store(0, Ordering::SeqCst);
    }
}

fn server_error() -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "injected failure".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

fn as_stored(object: &DynamicObject, revision: usize) -> DynamicObject {
    let mut stored = object.clone();
    stored.metadata.resource_version = Some(revision.to_string());
    stored.metadata.uid = Some(format!("uid-{revision}"));
    drop_empty_lists(&mut stored.data);
    if let Some(data) = stored.data.as_object_mut() {
        if data.contains_key("spec") {
            data.insert("status".to_string(), json!({ "observedGeneration": 1 }));
        }
    }
    stored
}

fn drop_empty_lists(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !matches!(v, Value::Array(items) if items.is_empty()));
            map.values_mut().for_each(drop_empty_lists);
        }
        Value::Array(items) => items.iter_mut().for_each(drop_empty_lists),
        _ => {}
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_object(
        &self,
        _namespace: &str,
        kind: ObjectKind,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.get(kind, name))
    }

    async fn apply_object(
        &self,
        _namespace: &str,
        kind: ObjectKind,
        object: &DynamicObject,
    ) -> Result<()> {
        if *self.failing_kind.lock() == Some(kind) {
            return Err(server_error());
        }
        let revision = self.applies.fetch_add(1, Ordering::SeqCst) + 1;
        self.insert(kind, as_stored(object, revision));
        Ok(())
    }

    async fn delete_object(&self, _namespace: &str, kind: ObjectKind, name: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .remove(&ObjectIdentity::new(kind, name));
        Ok(())
    }

    async fn get_config_map(&self, _namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.config_maps.lock().get(name).cloned())
    }

    async fn patch_status(
        &self,
        _namespace: &str,
        name: &str,
        status: &BackstageStatus,
    ) -> Result<()> {
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .insert(name.to_string(), status.clone());
        Ok(())
    }
}
