//! Error types for gridrun
//!
//! Every variant names the key, run, job or configuration it concerns so a
//! failure inside a large sweep can be pinpointed without re-running it.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// gridrun error types
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration mapping key is not a string
    #[error("Invalid configuration key {key}: configuration keys must be strings")]
    InvalidKey {
        /// Rendering of the offending key
        key: String,
    },

    /// A dotted path implies both a mapping and a leaf at the same location
    #[error("Conflicting configuration structure at '{path}': {reason}")]
    ConflictingStructure {
        /// Dotted path where the conflict was detected
        path: String,
        /// What collided
        reason: String,
    },

    /// Malformed or unsupported configuration input
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A grid axis has no candidate values
    #[error("Parameter '{key}' has an empty list of candidate values")]
    EmptyDomain {
        /// Dotted key of the empty axis
        key: String,
    },

    /// No run records matched the requested grid
    #[error("No runs found for {key}={value}")]
    EmptyGrid {
        /// Configuration key used for the lookup
        key: String,
        /// Value that was searched for
        value: String,
    },

    /// The user adapter (or one of its hooks) failed
    #[error("Adapter execution failed for config {config}: {message}")]
    AdapterExecution {
        /// JSON rendering of the configuration that triggered the failure
        config: String,
        /// Failure detail (stderr, exit status or adapter message)
        message: String,
    },

    /// Experiment repository unreachable or a stored record is malformed
    #[error("Repository error (run {run_id}): {message}")]
    Repository {
        /// Run identifier, or `-` when no single run is concerned
        run_id: String,
        /// Failure detail
        message: String,
    },

    /// Batch scheduler submission or status query failed
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Persisted table could not be written or interpreted
    #[error("Table error: {0}")]
    Table(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl Error {
    /// Repository error tied to one run.
    #[must_use]
    pub fn repository(run_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Repository {
            run_id: run_id.into(),
            message: message.into(),
        }
    }

    /// Adapter failure for the given configuration.
    #[must_use]
    pub fn adapter(config: &crate::config::Config, message: impl Into<String>) -> Self {
        Self::AdapterExecution {
            config: serde_json::to_string(config).unwrap_or_else(|_| format!("{config:?}")),
            message: message.into(),
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Only scheduler and IO failures are treated as transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Scheduler(_) | Self::Io(_))
    }
}
