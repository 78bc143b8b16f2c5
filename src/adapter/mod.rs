//! Adapter capability: the user code a run executes
//!
//! An adapter receives one configuration and a [`RunContext`] through which
//! it logs scalar metrics and attaches artifacts. Adapters are either Rust
//! closures ([`FnAdapter`]) or external programs described by a manifest
//! ([`CommandAdapter`]); dispatch only ever sees the [`Adapter`] trait.

mod command;

pub use command::{AdapterEvent, AdapterManifest, CommandAdapter};

use crate::config::Config;
use crate::experiment::{ArtifactRecord, MetricRecord, MetricSeries};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Experiment name used when an adapter does not declare one.
pub const DEFAULT_EXPERIMENT_NAME: &str = "gridrun_experiment";

/// User code executed once per configuration.
pub trait Adapter: Send + Sync {
    /// Name recorded on every run of this adapter.
    fn experiment_name(&self) -> &str {
        DEFAULT_EXPERIMENT_NAME
    }

    /// Execute one run.
    ///
    /// # Errors
    ///
    /// Any error is recorded as the run's failure.
    fn run(&self, config: &Config, ctx: &mut RunContext) -> Result<Option<Value>>;

    /// Called immediately before [`run`](Self::run) for grid runs.
    ///
    /// # Errors
    ///
    /// A hook failure fails the run like an adapter failure.
    fn pre_grid_hook(&self, _config: &Config) -> Result<()> {
        Ok(())
    }

    /// Called immediately after [`run`](Self::run) for grid runs.
    ///
    /// # Errors
    ///
    /// A hook failure fails the run like an adapter failure.
    fn post_grid_hook(&self, _config: &Config) -> Result<()> {
        Ok(())
    }
}

/// Side-effect channel handed to an adapter while it runs.
#[derive(Debug, Default)]
pub struct RunContext {
    metrics: Vec<MetricRecord>,
    last_step: HashMap<String, u64>,
    artifacts: Vec<ArtifactRecord>,
    captured_out: String,
}

impl RunContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `value` for metric `name`.
    ///
    /// Without an explicit step, the step is one past the last step logged
    /// for that metric (starting at 0). Non-finite values are not recorded:
    /// downstream they would be indistinguishable from missing cells.
    pub fn log_scalar(&mut self, name: &str, value: f64, step: impl Into<Option<u64>>) {
        let step = step
            .into()
            .unwrap_or_else(|| self.last_step.get(name).map_or(0, |last| last + 1));
        self.last_step.insert(name.to_string(), step);

        if !value.is_finite() {
            warn!(metric = name, step, value, "dropping non-finite metric value");
            return;
        }
        self.metrics.push(MetricRecord::new(name, step, value));
    }

    /// Attach the file at `path` to the run under `name`.
    ///
    /// # Errors
    ///
    /// Returns error if the file does not exist.
    pub fn add_artifact(&mut self, path: impl AsRef<Path>, name: impl Into<String>) -> Result<()> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)
            .map_err(|e| Error::Configuration(format!("artifact {}: {e}", path.display())))?
            .len();
        self.artifacts.push(ArtifactRecord::new(path, name, size));
        Ok(())
    }

    /// Append a line of adapter output.
    pub fn capture(&mut self, line: &str) {
        self.captured_out.push_str(line);
        self.captured_out.push('\n');
    }

    /// Points logged so far, in logging order.
    #[must_use]
    pub fn metrics(&self) -> &[MetricRecord] {
        &self.metrics
    }

    /// Artifacts attached so far.
    #[must_use]
    pub fn artifacts(&self) -> &[ArtifactRecord] {
        &self.artifacts
    }

    /// Output captured so far.
    #[must_use]
    pub fn captured_out(&self) -> &str {
        &self.captured_out
    }

    pub(crate) fn into_parts(self) -> (MetricSeries, Vec<ArtifactRecord>, String) {
        (
            MetricSeries::from_records(&self.metrics),
            self.artifacts,
            self.captured_out,
        )
    }
}

type Hook = Box<dyn Fn(&Config) -> Result<()> + Send + Sync>;

/// Adapter backed by a Rust closure.
///
/// ```rust
/// use gridrun::adapter::{Adapter, FnAdapter, RunContext};
/// use serde_json::json;
///
/// let adapter = FnAdapter::new("squares", |config, ctx: &mut RunContext| {
///     let n = config["n"].as_u64().unwrap_or(0);
///     for i in 0..n {
///         ctx.log_scalar("i_squared", (i * i) as f64, None);
///     }
///     Ok(Some(json!(n)))
/// });
///
/// let mut ctx = RunContext::new();
/// let config = json!({"n": 3}).as_object().unwrap().clone();
/// adapter.run(&config, &mut ctx)?;
/// assert_eq!(ctx.metrics().len(), 3);
/// # Ok::<(), gridrun::Error>(())
/// ```
pub struct FnAdapter<F> {
    name: String,
    run: F,
    pre: Option<Hook>,
    post: Option<Hook>,
}

impl<F> FnAdapter<F>
where
    F: Fn(&Config, &mut RunContext) -> Result<Option<Value>> + Send + Sync,
{
    /// Wrap `run` under the given experiment name.
    pub fn new(name: impl Into<String>, run: F) -> Self {
        Self {
            name: name.into(),
            run,
            pre: None,
            post: None,
        }
    }

    /// Install a pre-run hook.
    #[must_use]
    pub fn with_pre_grid_hook(
        mut self,
        hook: impl Fn(&Config) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.pre = Some(Box::new(hook));
        self
    }

    /// Install a post-run hook.
    #[must_use]
    pub fn with_post_grid_hook(
        mut self,
        hook: impl Fn(&Config) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.post = Some(Box::new(hook));
        self
    }
}

impl<F> Adapter for FnAdapter<F>
where
    F: Fn(&Config, &mut RunContext) -> Result<Option<Value>> + Send + Sync,
{
    fn experiment_name(&self) -> &str {
        &self.name
    }

    fn run(&self, config: &Config, ctx: &mut RunContext) -> Result<Option<Value>> {
        (self.run)(config, ctx)
    }

    fn pre_grid_hook(&self, config: &Config) -> Result<()> {
        self.pre.as_ref().map_or(Ok(()), |hook| hook(config))
    }

    fn post_grid_hook(&self, config: &Config) -> Result<()> {
        self.post.as_ref().map_or(Ok(()), |hook| hook(config))
    }
}
