//! CRD installation helpers for integration tests

use backstage_operator::crd::Backstage;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::wait::{await_condition, conditions};
use kube::{Api, Client, CustomResourceExt};
use std::time::Duration;
use thiserror::Error;

const CRD_NAME: &str = "backstages.rhdh.redhat.com";

#[derive(Error, Debug)]
pub enum CrdError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("CRD establishment timeout")]
    EstablishmentTimeout,

    #[error("Wait error: {0}")]
    WaitError(#[from] kube::runtime::wait::Error),
}

/// Install the Backstage CRD into the cluster
pub async fn install_crd(client: Client) -> Result<(), CrdError> {
    let crd = Backstage::crd();

    let crds: Api<CustomResourceDefinition> = Api::all(client);
    let params = PatchParams::apply("integration-test").force();

    tracing::info!("Installing Backstage CRD...");
    crds.patch(CRD_NAME, &params, &Patch::Apply(&crd)).await?;

    let establish = await_condition(crds, CRD_NAME, conditions::is_crd_established());
    tokio::time::timeout(Duration::from_secs(30), establish)
        .await
        .map_err(|_| CrdError::EstablishmentTimeout)??;

    tracing::info!("CRD installed and established");
    Ok(())
}
