use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::OperatorConfig;
use crate::controller::client::ClusterClient;
use crate::controller::error::BackoffConfig;
use crate::controller::state_machine::{PassTracker, ReconcilePhase};
use crate::health::HealthState;
use crate::model::layering::ManifestBundle;
use crate::platform::PlatformDefaults;

/// Shared context for the controller
pub struct Context {
    /// Cluster API seam
    pub client: Arc<dyn ClusterClient>,
    pub config: OperatorConfig,
    /// Base manifests after operator-wide overrides
    pub bundle: ManifestBundle,
    pub platform: PlatformDefaults,
    /// Metrics and readiness, absent in tests
    pub health_state: Option<Arc<HealthState>>,
    pub backoff: BackoffConfig,
    /// Consecutive failures per `namespace/name`
    failures: Mutex<HashMap<String, u32>>,
    /// Phase the last pass of each instance ended in
    phases: Mutex<HashMap<String, ReconcilePhase>>,
}

impl Context {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        config: OperatorConfig,
        bundle: ManifestBundle,
        platform: PlatformDefaults,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            config,
            bundle,
            platform,
            health_state,
            backoff: BackoffConfig::default(),
            failures: Mutex::new(HashMap::new()),
            phases: Mutex::new(HashMap::new()),
        }
    }

    /// Count a failure and return the number of failures before it
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.to_string()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    }

    pub fn reset_failures(&self, key: &str) {
        self.failures.lock().remove(key);
    }

    pub fn failure_count(&self, key: &str) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }

    /// Tracker for a new pass of `key`, continuing from its last outcome
    pub fn begin_pass(&self, key: &str) -> PassTracker {
        PassTracker::resume(self.phase(key))
    }

    pub fn end_pass(&self, key: &str, tracker: &PassTracker) {
        self.phases.lock().insert(key.to_string(), tracker.phase());
    }

    pub fn phase(&self, key: &str) -> Option<ReconcilePhase> {
        self.phases.lock().get(key).copied()
    }

    /// Drop everything remembered about an instance that is going away
    pub fn forget(&self, key: &str) {
        self.failures.lock().remove(key);
        self.phases.lock().remove(key);
    }
}
