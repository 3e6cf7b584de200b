//! Error types for the Backstage controller

use std::time::Duration;

use thiserror::Error;

/// Condition reason reported for configuration and manifest parsing failures
pub const REASON_CONFIG_ERROR: &str = "ConfigError";
/// Condition reason reported for invalid CR combinations
pub const REASON_VALIDATION_ERROR: &str = "ValidationError";
/// Condition reason reported when applying an object fails
pub const REASON_APPLY_ERROR: &str = "ApplyError";
/// Condition reason for everything else
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A manifest document could not be parsed into the expected object
    #[error("Failed to parse manifest {key}: {message}")]
    ConfigParseError { key: String, message: String },

    /// A required manifest document is missing from the bundle
    #[error("Missing default manifest: {0}")]
    MissingManifest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A pass event arrived that its phase does not accept
    #[error("Reconcile pass stopped in phase {phase}: {message}")]
    PassInterrupted { phase: String, message: String },

    /// Applying a single object failed
    #[error("Failed to apply {kind} {name}: {source}")]
    ApplyError {
        kind: String,
        name: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 409 Conflict and 429 TooManyRequests are the only retryable 4xx codes
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            Error::ApplyError { source, .. } => source.is_retryable(),
            // Referenced objects may be created later
            Error::NotFound(_) => true,
            // The next pass starts over from Building
            Error::PassInterrupted { .. } => true,
            Error::InvalidConfig(_)
            | Error::ConfigParseError { .. }
            | Error::MissingManifest(_)
            | Error::ValidationError(_)
            | Error::SerializationError(_)
            | Error::MissingObjectKey(_) => false,
        }
    }

    /// Check if this error is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(api_err)) => api_err.code == 404,
            Error::NotFound(_) => true,
            _ => false,
        }
    }

    /// Reason recorded on the `Deployed` condition for this error
    pub fn reason(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) | Error::ConfigParseError { .. } | Error::MissingManifest(_) => {
                REASON_CONFIG_ERROR
            }
            Error::ValidationError(_) => REASON_VALIDATION_ERROR,
            Error::ApplyError { .. } => REASON_APPLY_ERROR,
            _ => REASON_RECONCILE_ERROR,
        }
    }

    pub fn apply(kind: impl Into<String>, name: impl Into<String>, source: Error) -> Self {
        Error::ApplyError {
            kind: kind.into(),
            name: name.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(32) as i32;
        let base_delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        Duration::from_secs_f64(delay_with_jitter.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before the next attempt after `error`.
    ///
    /// Non-retryable errors wait for the regular requeue interval; they only
    /// clear once the CR or its configuration changes.
    pub fn delay_for_error(&self, error: &Error, attempt: u32, requeue_interval: Duration) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            requeue_interval
        }
    }
}
