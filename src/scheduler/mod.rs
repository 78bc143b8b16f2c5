//! Remote batch schedulers and job polling
//!
//! Runs submitted through a batch scheduler finish outside this process.
//! The [`BatchScheduler`] trait covers the two calls needed to observe them:
//! submitting a job script and querying job states in one batched call.
//!
//! # Example
//!
//! ```rust,no_run
//! use gridrun::scheduler::{JobId, JobPoller, SlurmScheduler};
//! use std::time::Duration;
//!
//! # async fn example() -> gridrun::Result<()> {
//! let poller = JobPoller::new(SlurmScheduler::new()).with_interval(Duration::from_secs(30));
//! let counts = poller.wait(&[JobId::new("4242"), JobId::new("4243")]).await?;
//! println!("{counts}");
//! # Ok(())
//! # }
//! ```

mod poller;
mod slurm;

pub use poller::JobPoller;
pub use slurm::SlurmScheduler;

use crate::Result;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

/// Opaque identifier assigned by a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap a scheduler-assigned id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse job state used for progress accounting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Queued or otherwise not yet started.
    Pending,
    /// Executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished any other way (failed, cancelled, timed out, ...).
    OtherTerminal(String),
}

impl JobState {
    /// Classify a raw scheduler state such as `RUNNING` or `CANCELLED by 1000`.
    #[must_use]
    pub fn classify(raw: &str) -> Self {
        let state = raw
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .trim_end_matches('+')
            .to_ascii_uppercase();
        match state.as_str() {
            "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED" | "RESIZING"
            | "SUSPENDED" => Self::Pending,
            "RUNNING" | "COMPLETING" | "STAGE_OUT" | "SIGNALING" => Self::Running,
            "COMPLETED" => Self::Completed,
            _ => Self::OtherTerminal(state),
        }
    }

    /// Whether the job may still change state.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Running => f.write_str("RUNNING"),
            Self::Completed => f.write_str("COMPLETED"),
            Self::OtherTerminal(raw) => f.write_str(raw),
        }
    }
}

/// One row of a status answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    /// Job the row describes.
    pub job_id: JobId,
    /// Classified state.
    pub state: JobState,
    /// Elapsed wall time as reported by the scheduler.
    pub elapsed: String,
}

/// Per-state job counts of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateCounts {
    /// Jobs not yet started, including jobs the scheduler did not report.
    pub pending: usize,
    /// Jobs executing.
    pub running: usize,
    /// Jobs finished successfully.
    pub completed: usize,
    /// Other terminal states, keyed by raw state.
    pub other: BTreeMap<String, usize>,
}

impl StateCounts {
    /// Count the states of `jobs` in a status answer.
    ///
    /// Jobs absent from `statuses` are counted as pending: accounting may
    /// not list a job right after submission.
    #[must_use]
    pub fn tally(jobs: &[JobId], statuses: &[JobStatus]) -> Self {
        let by_id: FxHashMap<&JobId, &JobState> =
            statuses.iter().map(|s| (&s.job_id, &s.state)).collect();
        let mut counts = Self::default();
        for job in jobs {
            match by_id.get(job) {
                None | Some(JobState::Pending) => counts.pending += 1,
                Some(JobState::Running) => counts.running += 1,
                Some(JobState::Completed) => counts.completed += 1,
                Some(JobState::OtherTerminal(raw)) => {
                    *counts.other.entry(raw.clone()).or_default() += 1;
                }
            }
        }
        counts
    }

    /// Jobs that are pending or running.
    #[must_use]
    pub const fn active(&self) -> usize {
        self.pending + self.running
    }

    /// Jobs in any other terminal state.
    #[must_use]
    pub fn other_total(&self) -> usize {
        self.other.values().sum()
    }

    /// Total number of jobs counted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.active() + self.completed + self.other_total()
    }
}

impl fmt::Display for StateCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PENDING={} RUNNING={} COMPLETED={}",
            self.pending, self.running, self.completed
        )?;
        for (state, count) in &self.other {
            write!(f, " {state}={count}")?;
        }
        Ok(())
    }
}

/// A remote batch scheduler.
pub trait BatchScheduler: Send + Sync {
    /// Submit a job script, returning the id the scheduler assigned.
    fn submit(&self, script: &str) -> impl Future<Output = Result<JobId>> + Send;

    /// Query the state of many jobs in a single call.
    ///
    /// Jobs the scheduler does not know yet may be missing from the answer.
    fn query_status(&self, jobs: &[JobId]) -> impl Future<Output = Result<Vec<JobStatus>>> + Send;
}
