//! Status and conditions management for Backstage resources
//!
//! Conditions follow Kubernetes conventions. A condition's transition time
//! only moves when its status flips, and the status subresource is only
//! patched when the condition list actually changed.

use chrono::Utc;
use kube::ResourceExt;
use tracing::debug;

use crate::controller::client::ClusterClient;
use crate::controller::error::{Error, Result};
use crate::crd::{Backstage, BackstageStatus, Condition};

/// Condition types set on a Backstage
pub mod condition_types {
    /// All objects of the instance were applied
    pub const DEPLOYED: &str = "Deployed";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
}

/// Reason of a successful pass
pub const REASON_DEPLOYED: &str = "Deployed";

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = Utc::now().to_rfc3339();
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Utc::now().to_rfc3339(),
                observed_generation: self.generation,
            });
        }
        self
    }

    /// Set the Deployed condition
    pub fn deployed(self, is_deployed: bool, reason: &str, message: &str) -> Self {
        let status = if is_deployed {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::DEPLOYED, status, reason, message)
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Status manager for one Backstage instance
pub struct StatusManager<'a> {
    backstage: &'a Backstage,
    client: &'a dyn ClusterClient,
}

impl<'a> StatusManager<'a> {
    pub fn new(backstage: &'a Backstage, client: &'a dyn ClusterClient) -> Self {
        Self { backstage, client }
    }

    fn existing_conditions(&self) -> Vec<Condition> {
        self.backstage
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default()
    }

    /// Set one condition; returns whether the status was patched
    pub async fn set_condition(
        &self,
        type_: &str,
        status: &str,
        reason: &str,
        message: &str,
    ) -> Result<bool> {
        let existing = self.existing_conditions();
        let conditions =
            ConditionBuilder::from_existing(existing.clone(), self.backstage.metadata.generation)
                .set_condition(type_, status, reason, message)
                .build();

        if conditions == existing {
            debug!(condition = type_, "status unchanged, skipping patch");
            return Ok(false);
        }

        let ns = self.backstage.namespace().unwrap_or_default();
        self.client
            .patch_status(&ns, &self.backstage.name_any(), &BackstageStatus { conditions })
            .await?;
        Ok(true)
    }

    /// Report a successful pass
    pub async fn set_deployed(&self) -> Result<bool> {
        self.set_condition(
            condition_types::DEPLOYED,
            condition_status::TRUE,
            REASON_DEPLOYED,
            "",
        )
        .await
    }

    /// Report a failed pass
    pub async fn set_failed(&self, error: &Error) -> Result<bool> {
        self.set_condition(
            condition_types::DEPLOYED,
            condition_status::FALSE,
            error.reason(),
            &error.to_string(),
        )
        .await
    }
}
