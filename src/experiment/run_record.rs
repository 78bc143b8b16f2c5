//! Run Record - one adapter execution against one configuration

use super::{ArtifactRecord, MetricSeries};
use crate::config::{flatten, Config, FlatConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run is created but not yet started.
    Pending,
    /// Run is currently executing.
    Running,
    /// Run completed successfully.
    Completed,
    /// Run failed with an error.
    Failed,
}

impl RunStatus {
    /// Whether the run has reached a final state.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Run Record represents a single execution of an adapter.
///
/// The repository assigns `run_id` when the record is created; the record
/// is immutable from then on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    run_id: String,
    experiment_name: String,
    config: Config,
    status: RunStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metrics: MetricSeries,
    #[serde(default)]
    artifacts: Vec<ArtifactRecord>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    fail_trace: Option<String>,
    #[serde(default)]
    captured_out: String,
}

impl RunRecord {
    /// Create a new run record in Pending status, without an id.
    #[must_use]
    pub fn new(experiment_name: impl Into<String>, config: Config) -> Self {
        Self {
            run_id: String::new(),
            experiment_name: experiment_name.into(),
            config,
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
            metrics: MetricSeries::new(),
            artifacts: Vec::new(),
            result: None,
            fail_trace: None,
            captured_out: String::new(),
        }
    }

    /// Create a builder, mostly useful for tests and importers.
    #[must_use]
    pub fn builder(experiment_name: impl Into<String>, config: Config) -> RunRecordBuilder {
        RunRecordBuilder::new(experiment_name, config)
    }

    /// Get the run ID (empty until the repository assigns one).
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Set the identifier chosen by the repository.
    pub fn assign_run_id(&mut self, run_id: impl Into<String>) {
        self.run_id = run_id.into();
    }

    /// Get the experiment name.
    #[must_use]
    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    /// Get the configuration the adapter was invoked with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Dotted-path view of the configuration.
    #[must_use]
    pub fn flat_config(&self) -> FlatConfig {
        flatten(&self.config)
    }

    /// Get the current run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the start timestamp, if the run has started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the end timestamp, if the run has completed.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Logged metrics.
    #[must_use]
    pub const fn metrics(&self) -> &MetricSeries {
        &self.metrics
    }

    /// Attached artifacts.
    #[must_use]
    pub fn artifacts(&self) -> &[ArtifactRecord] {
        &self.artifacts
    }

    /// Mutable access to artifacts, used by repositories that relocate files.
    pub fn artifacts_mut(&mut self) -> &mut Vec<ArtifactRecord> {
        &mut self.artifacts
    }

    /// Value returned by the adapter, if any.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Failure description for failed runs.
    #[must_use]
    pub fn fail_trace(&self) -> Option<&str> {
        self.fail_trace.as_deref()
    }

    /// Output the adapter printed while running.
    #[must_use]
    pub fn captured_out(&self) -> &str {
        &self.captured_out
    }

    /// Start the run, transitioning from Pending to Running.
    ///
    /// Sets the `started_at` timestamp to now.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Complete the run successfully with its outputs.
    pub fn complete(
        &mut self,
        metrics: MetricSeries,
        artifacts: Vec<ArtifactRecord>,
        result: Option<Value>,
        captured_out: String,
    ) {
        self.metrics = metrics;
        self.artifacts = artifacts;
        self.result = result;
        self.captured_out = captured_out;
        self.status = RunStatus::Completed;
        self.ended_at = Some(Utc::now());
    }

    /// Mark the run failed, keeping whatever it logged before failing.
    pub fn fail(
        &mut self,
        metrics: MetricSeries,
        artifacts: Vec<ArtifactRecord>,
        captured_out: String,
        trace: impl Into<String>,
    ) {
        self.metrics = metrics;
        self.artifacts = artifacts;
        self.captured_out = captured_out;
        self.fail_trace = Some(trace.into());
        self.status = RunStatus::Failed;
        self.ended_at = Some(Utc::now());
    }
}

impl RunRecord {
    /// Fail a finished run after the fact, e.g. when its outputs could not
    /// be stored. An existing trace is kept and extended.
    pub(crate) fn mark_failed(&mut self, trace: &str) {
        self.fail_trace = Some(match self.fail_trace.take() {
            Some(previous) => format!("{previous}\n{trace}"),
            None => trace.to_string(),
        });
        self.status = RunStatus::Failed;
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }
}

/// Persisted header of a run: everything except config, metrics and output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RunHeader {
    pub experiment_name: String,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub fail_trace: Option<String>,
}

impl RunRecord {
    pub(crate) fn header(&self) -> RunHeader {
        RunHeader {
            experiment_name: self.experiment_name.clone(),
            status: self.status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            artifacts: self.artifacts.clone(),
            result: self.result.clone(),
            fail_trace: self.fail_trace.clone(),
        }
    }

    pub(crate) fn from_header(
        run_id: String,
        header: RunHeader,
        config: Config,
        metrics: MetricSeries,
        captured_out: String,
    ) -> Self {
        Self {
            run_id,
            experiment_name: header.experiment_name,
            config,
            status: header.status,
            started_at: header.started_at,
            ended_at: header.ended_at,
            metrics,
            artifacts: header.artifacts,
            result: header.result,
            fail_trace: header.fail_trace,
            captured_out,
        }
    }
}

/// Builder for `RunRecord`.
#[derive(Debug)]
pub struct RunRecordBuilder {
    record: RunRecord,
}

impl RunRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(experiment_name: impl Into<String>, config: Config) -> Self {
        Self {
            record: RunRecord::new(experiment_name, config),
        }
    }

    /// Set the run id.
    #[must_use]
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.record.run_id = run_id.into();
        self
    }

    /// Set the metric series.
    #[must_use]
    pub fn metrics(mut self, metrics: MetricSeries) -> Self {
        self.record.metrics = metrics;
        self
    }

    /// Add one metric point.
    #[must_use]
    pub fn metric(mut self, name: &str, step: u64, value: f64) -> Self {
        self.record.metrics.insert(name, step, value);
        self
    }

    /// Set the final status (timestamps are filled in for finished runs).
    #[must_use]
    pub fn status(mut self, status: RunStatus) -> Self {
        self.record.status = status;
        if status != RunStatus::Pending {
            self.record.started_at.get_or_insert_with(Utc::now);
        }
        if status.is_finished() {
            self.record.ended_at.get_or_insert_with(Utc::now);
        }
        self
    }

    /// Build the `RunRecord`.
    #[must_use]
    pub fn build(self) -> RunRecord {
        self.record
    }
}
