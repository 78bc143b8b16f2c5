//! Run dispatch: execute configurations against an adapter
//!
//! Three modes share one contract: every configuration is executed once and
//! produces one run record.
//!
//! - [`RunDispatcher`] runs in the calling thread, in input order.
//! - [`ParallelDispatcher`] spreads runs over worker processes.
//! - [`BatchDispatcher`] submits one job per configuration to a batch
//!   scheduler; the submitted job writes its own record.

mod batch;
mod parallel;

pub use batch::{append_job_ids, read_job_ids, BatchDispatcher, BatchSubmission, BatchTemplate};
pub use parallel::{ParallelDispatcher, WorkerLauncher};

use crate::adapter::{Adapter, RunContext};
use crate::config::Config;
use crate::experiment::{ExperimentRepository, RunRecord};
use crate::{Error, Result};
use serde_json::Value;
use tracing::{info, warn};

/// What serial dispatch does after a failed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop at the first failure and return its error.
    #[default]
    FailFast,
    /// Record the failure and continue with the next configuration.
    ContinueOnError,
}

/// A configuration that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRun {
    /// Position of the configuration in the dispatched sequence.
    pub index: usize,
    /// Id of the stored record, when known to the dispatcher.
    pub run_id: Option<String>,
}

/// A configuration whose run failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    /// Position of the configuration in the dispatched sequence.
    pub index: usize,
    /// The configuration that failed.
    pub config: Config,
    /// Failure description.
    pub message: String,
}

/// Outcome of dispatching a sequence of configurations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Successful runs, in completion order.
    pub completed: Vec<CompletedRun>,
    /// Failed runs, in completion order.
    pub failures: Vec<RunFailure>,
}

impl DispatchReport {
    /// Whether every run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of runs that finished either way.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.completed.len() + self.failures.len()
    }
}

/// Execute one configuration without grid hooks and store its record.
///
/// # Errors
///
/// Returns the adapter failure (after its record is stored) or a
/// repository error.
pub fn execute_run<A, R>(adapter: &A, config: &Config, repo: &R) -> Result<String>
where
    A: Adapter + ?Sized,
    R: ExperimentRepository + ?Sized,
{
    execute(adapter, config, repo, false)
}

/// Execute one configuration of a grid, surrounded by the adapter's
/// pre- and post-grid hooks, and store its record.
///
/// # Errors
///
/// Returns the adapter or hook failure (after its record is stored) or a
/// repository error.
pub fn execute_grid_run<A, R>(adapter: &A, config: &Config, repo: &R) -> Result<String>
where
    A: Adapter + ?Sized,
    R: ExperimentRepository + ?Sized,
{
    execute(adapter, config, repo, true)
}

fn execute<A, R>(adapter: &A, config: &Config, repo: &R, hooks: bool) -> Result<String>
where
    A: Adapter + ?Sized,
    R: ExperimentRepository + ?Sized,
{
    let mut record = RunRecord::new(adapter.experiment_name(), config.clone());
    record.start();

    let mut ctx = RunContext::new();
    let outcome = run_adapter(adapter, config, &mut ctx, hooks);
    let (metrics, artifacts, captured_out) = ctx.into_parts();

    match outcome {
        Ok(result) => {
            record.complete(metrics, artifacts, result, captured_out);
            let run_id = repo.create(record)?;
            info!(run_id = %run_id, experiment = adapter.experiment_name(), "run completed");
            Ok(run_id)
        }
        Err(e) => {
            let error = match e {
                Error::AdapterExecution { .. } => e,
                other => Error::adapter(config, other.to_string()),
            };
            record.fail(metrics, artifacts, captured_out, error.to_string());
            match repo.create(record) {
                Ok(run_id) => warn!(run_id = %run_id, error = %error, "run failed"),
                // stored as failed all the same
                Err(Error::AdapterExecution { .. }) => warn!(error = %error, "run failed"),
                Err(e) => return Err(e),
            }
            Err(error)
        }
    }
}

fn run_adapter<A: Adapter + ?Sized>(
    adapter: &A,
    config: &Config,
    ctx: &mut RunContext,
    hooks: bool,
) -> Result<Option<Value>> {
    if hooks {
        adapter.pre_grid_hook(config)?;
    }
    let result = adapter.run(config, ctx)?;
    if hooks {
        adapter.post_grid_hook(config)?;
    }
    Ok(result)
}

/// Serial dispatcher running every configuration in the calling thread.
pub struct RunDispatcher<'a, A: ?Sized, R: ?Sized> {
    adapter: &'a A,
    repo: &'a R,
    policy: FailurePolicy,
}

impl<'a, A, R> RunDispatcher<'a, A, R>
where
    A: Adapter + ?Sized,
    R: ExperimentRepository + ?Sized,
{
    /// Dispatcher writing records to `repo`, failing fast.
    pub const fn new(adapter: &'a A, repo: &'a R) -> Self {
        Self {
            adapter,
            repo,
            policy: FailurePolicy::FailFast,
        }
    }

    /// Choose what happens after a failed run.
    #[must_use]
    pub const fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run `configs` in order, with grid hooks.
    ///
    /// # Errors
    ///
    /// Under [`FailurePolicy::FailFast`], the first failure. Repository
    /// errors always abort.
    pub fn run(&self, configs: &[Config]) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let total = configs.len();
        for (index, config) in configs.iter().enumerate() {
            info!(run = index + 1, total, "grid run");
            match execute_grid_run(self.adapter, config, self.repo) {
                Ok(run_id) => report.completed.push(CompletedRun {
                    index,
                    run_id: Some(run_id),
                }),
                Err(e @ Error::AdapterExecution { .. })
                    if self.policy == FailurePolicy::ContinueOnError =>
                {
                    report.failures.push(RunFailure {
                        index,
                        config: config.clone(),
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            completed = report.completed.len(),
            failed = report.failures.len(),
            "grid finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::FnAdapter;
    use crate::experiment::{MemoryRepository, RunStatus};
    use serde_json::json;

    fn configs() -> Vec<Config> {
        (1..=3)
            .map(|n| json!({"n": n}).as_object().unwrap().clone())
            .collect()
    }

    fn adapter() -> impl Adapter {
        FnAdapter::new("serial", |config: &Config, ctx: &mut RunContext| {
            let n = config["n"].as_i64().unwrap_or(0);
            ctx.log_scalar("n_squared", (n * n) as f64, None);
            ctx.capture("working");
            if n == 2 {
                return Err(Error::Configuration("n must not be 2".into()));
            }
            Ok(Some(json!(n)))
        })
    }

    #[test]
    fn test_execute_run_stores_completed_record() {
        let repo = MemoryRepository::new();
        let config = configs().remove(0);
        let id = execute_run(&adapter(), &config, &repo).unwrap();

        let run = repo.get(&id).unwrap().unwrap();
        assert_eq!(run.status(), RunStatus::Completed);
        assert_eq!(run.experiment_name(), "serial");
        assert_eq!(run.result(), Some(&json!(1)));
        assert_eq!(run.metrics().get("n_squared").unwrap()[&0], 1.0);
        assert_eq!(run.captured_out(), "working\n");
    }

    #[test]
    fn test_failed_run_is_stored_with_trace() {
        let repo = MemoryRepository::new();
        let config = configs().remove(1);
        let err = execute_run(&adapter(), &config, &repo).unwrap_err();
        assert!(matches!(err, Error::AdapterExecution { .. }));
        assert!(err.to_string().contains(r#"{"n":2}"#));

        let run = repo.get("1").unwrap().unwrap();
        assert_eq!(run.status(), RunStatus::Failed);
        assert!(run.fail_trace().unwrap().contains("n must not be 2"));
        // metrics logged before the failure are kept
        assert_eq!(run.metrics().point_count(), 1);
    }

    #[test]
    fn test_serial_fail_fast_stops() {
        let repo = MemoryRepository::new();
        let adapter = adapter();
        let result = RunDispatcher::new(&adapter, &repo).run(&configs());
        assert!(result.is_err());
        assert_eq!(repo.len(), 2);
    }

    #[test]
    fn test_serial_continue_on_error() {
        let repo = MemoryRepository::new();
        let adapter = adapter();
        let report = RunDispatcher::new(&adapter, &repo)
            .with_policy(FailurePolicy::ContinueOnError)
            .run(&configs())
            .unwrap();
        assert_eq!(report.completed.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(repo.len(), 3);
        assert!(!report.is_success());
    }

    #[test]
    fn test_hook_failure_fails_run() {
        let repo = MemoryRepository::new();
        let adapter = FnAdapter::new("hooked", |_: &Config, _: &mut RunContext| Ok(None))
            .with_post_grid_hook(|_| Err(Error::Configuration("cleanup failed".into())));
        let config = configs().remove(0);

        assert!(execute_run(&adapter, &config, &repo).is_ok());
        assert!(execute_grid_run(&adapter, &config, &repo).is_err());
        assert_eq!(repo.get("2").unwrap().unwrap().status(), RunStatus::Failed);
    }
}
