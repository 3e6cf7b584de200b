//! Unit tests for status management

use backstage_operator::controller::Error;
use backstage_operator::controller::status::{
    ConditionBuilder, REASON_DEPLOYED, StatusManager, condition_status, condition_types,
};
use backstage_operator::crd::BackstageStatus;

use crate::common::*;

mod condition_builder_tests {
    use super::*;

    #[test]
    fn test_new_condition_builder() {
        let conditions = ConditionBuilder::new(Some(1)).build();
        assert!(conditions.is_empty());
    }

    #[test]
    fn test_deployed_adds_single_condition() {
        let conditions = ConditionBuilder::new(Some(1))
            .deployed(true, REASON_DEPLOYED, "")
            .deployed(true, REASON_DEPLOYED, "")
            .build();

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, condition_types::DEPLOYED);
        assert_eq!(conditions[0].status, condition_status::TRUE);
        assert_eq!(conditions[0].observed_generation, Some(1));
    }

    #[test]
    fn test_flip_moves_transition_time() {
        let mut initial = ConditionBuilder::new(Some(1))
            .deployed(false, "ApplyError", "boom")
            .build();
        initial[0].last_transition_time = "2020-01-01T00:00:00+00:00".to_string();

        let flipped = ConditionBuilder::from_existing(initial, Some(1))
            .deployed(true, REASON_DEPLOYED, "")
            .build();
        assert_ne!(flipped[0].last_transition_time, "2020-01-01T00:00:00+00:00");
        assert_eq!(flipped[0].message, "");
    }

    #[test]
    fn test_other_conditions_preserved() {
        let initial = ConditionBuilder::new(Some(1))
            .set_condition("Custom", "Unknown", "Pending", "")
            .build();

        let updated = ConditionBuilder::from_existing(initial, Some(1))
            .deployed(true, REASON_DEPLOYED, "")
            .build();
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[0].type_, "Custom");
    }
}

mod status_manager_tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_reason_follows_error_kind() {
        let cluster = FakeCluster::new();
        let bs = create_test_backstage("bs1", "ns");
        let manager = StatusManager::new(&bs, &cluster);

        let cases = [
            (
                Error::ConfigParseError {
                    key: "deployment.yaml".into(),
                    message: "bad".into(),
                },
                "ConfigError",
            ),
            (Error::ValidationError("bad".into()), "ValidationError"),
            (Error::NotFound("ConfigMap ns/x".into()), "ReconcileError"),
            (
                Error::apply("Deployment", "backstage-bs1", Error::NotFound("x".into())),
                "ApplyError",
            ),
        ];

        for (error, reason) in cases {
            manager.set_failed(&error).await.unwrap();
            let status: BackstageStatus = cluster.status("bs1").unwrap();
            assert_eq!(status.conditions[0].status, condition_status::FALSE);
            assert_eq!(status.conditions[0].reason, reason);
            assert_eq!(status.conditions[0].message, error.to_string());
        }
    }

    #[tokio::test]
    async fn test_repeated_success_patches_once() {
        let cluster = FakeCluster::new();
        let mut bs = create_test_backstage("bs1", "ns");

        assert!(StatusManager::new(&bs, &cluster).set_deployed().await.unwrap());
        bs.status = cluster.status("bs1");
        assert!(!StatusManager::new(&bs, &cluster).set_deployed().await.unwrap());
        assert_eq!(
            cluster
                .status_patches
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }
}
