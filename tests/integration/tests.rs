//! End-to-end tests against a live cluster

use std::time::Duration;

use backstage_operator::crd::{Backstage, OpenShiftRoute};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Service;
use kube::Api;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};

use crate::common::BackstageBuilder;
use crate::{ScopedOperator, TestNamespace, exists, has_condition, is_gone, test_client, wait_for};

const TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn test_instance_becomes_deployed() {
    let client = test_client().await.unwrap();
    let ns = TestNamespace::create(client.clone(), "bs-deployed").await.unwrap();
    let _operator = ScopedOperator::start(client.clone(), ns.name()).await;

    let backstages: Api<Backstage> = Api::namespaced(client.clone(), ns.name());
    let bs = BackstageBuilder::new("bs1", ns.name()).without_uid().build();
    backstages.create(&PostParams::default(), &bs).await.unwrap();

    wait_for(backstages, "bs1", has_condition("Deployed", "True"), TIMEOUT)
        .await
        .unwrap();

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), ns.name());
    assert!(deployments.get_opt("backstage-bs1").await.unwrap().is_some());

    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), ns.name());
    let services: Api<Service> = Api::namespaced(client, ns.name());
    let sts = statefulsets.get("backstage-psql-bs1").await.unwrap();
    let svc = services.get("backstage-psql-bs1").await.unwrap();
    assert_eq!(sts.spec.unwrap().service_name, svc.metadata.name);
    assert_eq!(svc.spec.unwrap().cluster_ip.as_deref(), Some("None"));

    ns.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a Kubernetes cluster serving route.openshift.io"]
async fn test_route_toggle() {
    let client = test_client().await.unwrap();
    let ns = TestNamespace::create(client.clone(), "bs-route").await.unwrap();
    let operator = ScopedOperator::start(client.clone(), ns.name()).await;
    if !operator.platform.supports_routes() {
        tracing::warn!("cluster does not serve routes, skipping");
        ns.cleanup().await.unwrap();
        return;
    }

    let backstages: Api<Backstage> = Api::namespaced(client.clone(), ns.name());
    let routes: Api<OpenShiftRoute> = Api::namespaced(client.clone(), ns.name());
    let bs = BackstageBuilder::new("bs1", ns.name())
        .without_uid()
        .with_route(true)
        .build();
    backstages.create(&PostParams::default(), &bs).await.unwrap();

    wait_for(routes.clone(), "backstage-bs1", exists(), TIMEOUT)
        .await
        .unwrap();

    let patch = serde_json::json!({ "spec": { "application": { "route": { "enabled": false } } } });
    backstages
        .patch("bs1", &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .unwrap();

    wait_for(routes, "backstage-bs1", is_gone(), TIMEOUT)
        .await
        .unwrap();
    wait_for(backstages, "bs1", has_condition("Deployed", "True"), TIMEOUT)
        .await
        .unwrap();

    ns.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn test_deleting_instance_leaves_cleanup_to_garbage_collection() {
    let client = test_client().await.unwrap();
    let ns = TestNamespace::create(client.clone(), "bs-delete").await.unwrap();
    let _operator = ScopedOperator::start(client.clone(), ns.name()).await;

    let backstages: Api<Backstage> = Api::namespaced(client.clone(), ns.name());
    let bs = BackstageBuilder::new("bs1", ns.name())
        .without_uid()
        .without_local_db()
        .build();
    backstages.create(&PostParams::default(), &bs).await.unwrap();
    wait_for(backstages.clone(), "bs1", has_condition("Deployed", "True"), TIMEOUT)
        .await
        .unwrap();

    let deployment = Api::<Deployment>::namespaced(client.clone(), ns.name())
        .get("backstage-bs1")
        .await
        .unwrap();
    let owners = deployment.metadata.owner_references.unwrap();
    assert_eq!(owners[0].kind, "Backstage");
    assert_eq!(owners[0].controller, Some(true));

    backstages
        .delete("bs1", &DeleteParams::foreground())
        .await
        .unwrap();
    wait_for(backstages, "bs1", is_gone(), TIMEOUT).await.unwrap();

    ns.cleanup().await.unwrap();
}
