// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for spec translation and model construction
//!
//! These tests use proptest to generate random Backstage specs and verify that:
//! 1. Translation never loses the difference between unset and empty pull secrets
//! 2. Explicit pull secrets always reach every workload in CR order
//! 3. The database workload and its headless service always agree on a name
//! 4. Model construction is deterministic apart from generated passwords
//! 5. The pass state machine never panics on any event sequence

#[path = "../common/mod.rs"]
mod common;

use proptest::prelude::*;

use backstage_operator::controller::state_machine::{
    PassEvent, PassStateMachine, ReconcilePhase, TransitionContext, TransitionResult,
};
use backstage_operator::model::ObjectKind;
use backstage_operator::model::spec::{PullSecrets, translate};
use backstage_operator::platform::Platform;

use common::*;

fn secret_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,20}"
}

fn pull_secrets() -> impl Strategy<Value = Option<Vec<String>>> {
    prop::option::of(prop::collection::vec(secret_name(), 0..5))
}

fn platform() -> impl Strategy<Value = Platform> {
    prop_oneof![Just(Platform::Default), Just(Platform::ManagedPlatform)]
}

fn backstage(
    secrets: &Option<Vec<String>>,
    local_db: Option<bool>,
    replicas: Option<i32>,
) -> backstage_operator::crd::Backstage {
    let mut builder = BackstageBuilder::new("bs1", "ns");
    if let Some(names) = secrets {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        builder = builder.with_pull_secrets(&names);
    }
    if let Some(enabled) = local_db {
        builder = builder.with_local_db(enabled);
    }
    if let Some(replicas) = replicas {
        builder = builder.with_replicas(replicas);
    }
    builder.build()
}

fn event() -> impl Strategy<Value = PassEvent> {
    prop_oneof![
        Just(PassEvent::ModelBuilt),
        Just(PassEvent::ObjectsConverged),
        Just(PassEvent::PassFailed),
        Just(PassEvent::PassStarted),
    ]
}

proptest! {
    #[test]
    fn translation_preserves_pull_secret_presence(secrets in pull_secrets()) {
        let bs = backstage(&secrets, None, None);
        let spec = translate(&bs.spec);

        match &secrets {
            None => prop_assert_eq!(spec.pull_secrets, PullSecrets::Unset),
            Some(names) => prop_assert_eq!(spec.pull_secrets, PullSecrets::Explicit(names.clone())),
        }
    }

    #[test]
    fn explicit_pull_secrets_reach_every_workload(
        secrets in prop::collection::vec(secret_name(), 0..5),
        platform in platform(),
    ) {
        let bs = backstage(&Some(secrets.clone()), Some(true), None);
        let model = ModelFixture::new(platform)
            .with_raw_document("db-statefulset.yaml", &testdata("ips-db-statefulset.yaml"))
            .build(&bs);

        let deploy_pod = model.backstage_deployment.unwrap().spec.unwrap().template.spec.unwrap();
        let db_pod = model.local_db_statefulset.unwrap().spec.unwrap().template.spec.unwrap();
        for pod in [deploy_pod, db_pod] {
            let names: Vec<String> = pod
                .image_pull_secrets
                .unwrap_or_default()
                .into_iter()
                .map(|r| r.name)
                .collect();
            prop_assert_eq!(&names, &secrets);
        }
    }

    #[test]
    fn database_objects_agree_on_name(local_db in prop::option::of(any::<bool>()), platform in platform()) {
        let bs = backstage(&None, local_db, None);
        let model = ModelFixture::new(platform).build(&bs);

        if local_db.unwrap_or(true) {
            let sts = model.local_db_statefulset.unwrap();
            let svc = model.local_db_service.unwrap();
            prop_assert_eq!(sts.spec.unwrap().service_name, svc.metadata.name);
            let svc_spec = svc.spec.unwrap();
            prop_assert_eq!(svc_spec.cluster_ip.as_deref(), Some("None"));
        } else {
            prop_assert!(model.local_db_statefulset.is_none());
            prop_assert!(model.local_db_service.is_none());
            prop_assert!(model.absent.iter().any(|id| id.kind == ObjectKind::StatefulSet));
        }
    }

    #[test]
    fn model_is_deterministic(
        secrets in pull_secrets(),
        local_db in prop::option::of(any::<bool>()),
        replicas in prop::option::of(0i32..10),
        platform in platform(),
    ) {
        let bs = backstage(&secrets, local_db, replicas);
        let fixture = ModelFixture::new(platform);

        let first = fixture.build(&bs).desired_objects().unwrap();
        let second = fixture.build(&bs).desired_objects().unwrap();
        prop_assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            prop_assert_eq!(&a.identity, &b.identity);
            if a.identity.kind != ObjectKind::Secret {
                prop_assert_eq!(&a.hash, &b.hash);
            }
        }
    }

    #[test]
    fn state_machine_never_panics(events in prop::collection::vec(event(), 0..30), pending in 0usize..3) {
        let machine = PassStateMachine::new();
        let ctx = TransitionContext { pending_objects: pending };
        let mut phase = ReconcilePhase::Building;

        for event in events {
            if let TransitionResult::Success { to, .. } = machine.transition(phase, event, &ctx) {
                phase = to;
            }
        }
        prop_assert!(matches!(
            phase,
            ReconcilePhase::Building | ReconcilePhase::Applying | ReconcilePhase::Deployed | ReconcilePhase::Failed
        ));
    }
}
