//! Poll batch jobs until none is pending or running

use super::{BatchScheduler, JobId, StateCounts};
use crate::Result;
use std::time::Duration;
use tracing::{info, warn};

/// Default time between status queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of consecutive transient failures tolerated.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Waits for a set of batch jobs to finish.
///
/// Every tick issues one batched status query and logs the per-state counts.
/// The poller never changes job state.
#[derive(Debug, Clone)]
pub struct JobPoller<S> {
    scheduler: S,
    interval: Duration,
    max_retries: u32,
}

impl<S: BatchScheduler> JobPoller<S> {
    /// Poller with the default interval and retry budget.
    pub const fn new(scheduler: S) -> Self {
        Self {
            scheduler,
            interval: DEFAULT_POLL_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the time between polls.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set how many consecutive transient query failures are retried.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The wrapped scheduler.
    pub const fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Query all `jobs` once, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the last error once the retry budget is spent, or any
    /// non-transient error immediately.
    pub async fn poll_once(&self, jobs: &[JobId]) -> Result<StateCounts> {
        let mut failures = 0;
        loop {
            match self.scheduler.query_status(jobs).await {
                Ok(statuses) => return Ok(StateCounts::tally(jobs, &statuses)),
                Err(e) if e.is_transient() && failures < self.max_retries => {
                    failures += 1;
                    warn!(error = %e, attempt = failures, "job status query failed, retrying");
                    tokio::time::sleep(self.interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Poll until no job is pending or running and return the final counts.
    ///
    /// At least one query is made, even when every job is already finished.
    ///
    /// # Errors
    ///
    /// Returns error if a status query keeps failing.
    pub async fn wait(&self, jobs: &[JobId]) -> Result<StateCounts> {
        loop {
            let counts = self.poll_once(jobs).await?;
            info!(
                pending = counts.pending,
                running = counts.running,
                completed = counts.completed,
                other = counts.other_total(),
                "{counts}"
            );
            if counts.active() == 0 {
                return Ok(counts);
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{JobState, JobStatus};
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scheduler replaying scripted answers, one per query.
    struct Scripted {
        answers: Mutex<Vec<Result<Vec<JobState>>>>,
        queries: AtomicUsize,
    }

    impl Scripted {
        fn new(mut answers: Vec<Result<Vec<JobState>>>) -> Self {
            answers.reverse();
            Self {
                answers: Mutex::new(answers),
                queries: AtomicUsize::new(0),
            }
        }
    }

    impl BatchScheduler for Scripted {
        async fn submit(&self, _script: &str) -> Result<JobId> {
            Ok(JobId::new("0"))
        }

        async fn query_status(&self, jobs: &[JobId]) -> Result<Vec<JobStatus>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let answer = self.answers.lock().unwrap().pop().unwrap()?;
            Ok(jobs
                .iter()
                .zip(answer)
                .map(|(job, state)| JobStatus {
                    job_id: job.clone(),
                    state,
                    elapsed: String::new(),
                })
                .collect())
        }
    }

    fn jobs(n: usize) -> Vec<JobId> {
        (0..n).map(|i| JobId::new(i.to_string())).collect()
    }

    #[tokio::test]
    async fn test_wait_until_terminal() {
        use JobState::{Completed, Pending, Running};
        let scheduler = Scripted::new(vec![
            Ok(vec![Pending, Pending]),
            Ok(vec![Running, Completed]),
            Ok(vec![Completed, Completed]),
        ]);
        let poller = JobPoller::new(scheduler).with_interval(Duration::from_millis(1));
        let counts = poller.wait(&jobs(2)).await.unwrap();
        assert_eq!(counts.completed, 2);
        assert_eq!(poller.scheduler().queries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_at_entry_still_queries_once() {
        let scheduler = Scripted::new(vec![Ok(vec![JobState::OtherTerminal("FAILED".into())])]);
        let poller = JobPoller::new(scheduler).with_interval(Duration::from_millis(1));
        let counts = poller.wait(&jobs(1)).await.unwrap();
        assert_eq!(counts.other_total(), 1);
        assert_eq!(poller.scheduler().queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let scheduler = Scripted::new(vec![
            Err(Error::Scheduler("sacct: timeout".into())),
            Err(Error::Scheduler("sacct: timeout".into())),
            Ok(vec![JobState::Completed]),
        ]);
        let poller = JobPoller::new(scheduler).with_interval(Duration::from_millis(1));
        assert_eq!(poller.wait(&jobs(1)).await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let scheduler = Scripted::new(vec![
            Err(Error::Scheduler("down".into())),
            Err(Error::Scheduler("down".into())),
        ]);
        let poller = JobPoller::new(scheduler)
            .with_interval(Duration::from_millis(1))
            .with_max_retries(1);
        assert!(matches!(poller.wait(&jobs(1)).await, Err(Error::Scheduler(_))));
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let scheduler = Scripted::new(vec![Err(Error::Configuration("bad".into()))]);
        let poller = JobPoller::new(scheduler).with_interval(Duration::from_millis(1));
        assert!(poller.wait(&jobs(1)).await.is_err());
        assert_eq!(poller.scheduler().queries.load(Ordering::SeqCst), 1);
    }
}
