//! Cluster API seam used by the reconciler
//!
//! Every call the reconciler makes against the cluster goes through
//! [`ClusterClient`], so a pass can run against a mock or an in-memory fake.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PropagationPolicy};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::controller::error::{Error, Result};
use crate::crd::{Backstage, BackstageStatus};
use crate::model::ObjectKind;
use crate::resources::FIELD_MANAGER;

/// Trait abstracting Kubernetes client operations for Backstage instances
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch an object; `None` when it does not exist
    async fn get_object(
        &self,
        namespace: &str,
        kind: ObjectKind,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// Create or update an object with server-side apply
    async fn apply_object(
        &self,
        namespace: &str,
        kind: ObjectKind,
        object: &DynamicObject,
    ) -> Result<()>;

    /// Delete an object; a missing object is not an error
    async fn delete_object(&self, namespace: &str, kind: ObjectKind, name: &str) -> Result<()>;

    /// Fetch a ConfigMap; `None` when it does not exist
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Merge-patch the status subresource of a Backstage
    async fn patch_status(&self, namespace: &str, name: &str, status: &BackstageStatus)
    -> Result<()>;
}

/// [`ClusterClient`] backed by a kube [`Client`]
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, namespace: &str, kind: ObjectKind) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_object(
        &self,
        namespace: &str,
        kind: ObjectKind,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.dynamic_api(namespace, kind).get_opt(name).await?)
    }

    async fn apply_object(
        &self,
        namespace: &str,
        kind: ObjectKind,
        object: &DynamicObject,
    ) -> Result<()> {
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?;
        self.dynamic_api(namespace, kind)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(object),
            )
            .await?;
        Ok(())
    }

    async fn delete_object(&self, namespace: &str, kind: ObjectKind, name: &str) -> Result<()> {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match self.dynamic_api(namespace, kind).delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(%kind, name, "object already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BackstageStatus,
    ) -> Result<()> {
        let api: Api<Backstage> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
