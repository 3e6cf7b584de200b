pub mod client;
pub mod context;
pub mod error;
pub mod reconciler;
pub mod state_machine;
pub mod status;
pub mod validation;

pub use client::{ClusterClient, KubeClusterClient};
pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use reconciler::{ApplySummary, converge, error_policy, fetch_external_config, reconcile};
pub use state_machine::{PassEvent, PassTracker, ReconcilePhase};
pub use status::{ConditionBuilder, StatusManager};
pub use validation::{MIN_REPLICAS, validate_spec};
