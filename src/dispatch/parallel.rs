//! Local parallel dispatch over worker processes
//!
//! Each configuration is written to a file and executed by a separate
//! `gridrun run` process, so adapter state never leaks between runs. The
//! orchestrator wakes at a fixed interval, reaps finished workers and
//! starts queued ones. Workers are spawned with `kill_on_drop`: if the
//! dispatch future is dropped or fails, no worker outlives it.

use super::{CompletedRun, DispatchReport, RunFailure};
use crate::config::Config;
use crate::experiment::atomic_write;
use crate::Result;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Starts one worker process per configuration file.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    manifest: PathBuf,
    file_root: PathBuf,
}

impl WorkerLauncher {
    /// Launch workers with `program` (a `gridrun` binary).
    pub fn new(
        program: impl Into<PathBuf>,
        manifest: impl Into<PathBuf>,
        file_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            manifest: manifest.into(),
            file_root: file_root.into(),
        }
    }

    /// Launch workers with the running executable.
    ///
    /// # Errors
    ///
    /// Returns error if the current executable cannot be located.
    pub fn current_exe(manifest: impl Into<PathBuf>, file_root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, manifest, file_root))
    }

    /// Shell command line a worker runs for `config_path`.
    #[must_use]
    pub fn command_line(&self, config_path: &Path) -> String {
        self.args(config_path)
            .iter()
            .map(|arg| shell_quote(&arg.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn args(&self, config_path: &Path) -> Vec<std::ffi::OsString> {
        vec![
            self.program.clone().into_os_string(),
            "run".into(),
            self.manifest.clone().into_os_string(),
            config_path.as_os_str().to_owned(),
            "--file-root".into(),
            self.file_root.clone().into_os_string(),
            "--grid-hooks".into(),
        ]
    }

    fn spawn(&self, config_path: &Path) -> std::io::Result<Child> {
        let args = self.args(config_path);
        Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Quote `arg` for a POSIX shell unless it is plainly safe.
pub(crate) fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Runs configurations on a bounded pool of worker processes.
#[derive(Debug, Clone)]
pub struct ParallelDispatcher {
    launcher: WorkerLauncher,
    workers: usize,
    poll_interval: Duration,
}

impl ParallelDispatcher {
    /// Pool sized to the available parallelism, checking workers every second.
    #[must_use]
    pub fn new(launcher: WorkerLauncher) -> Self {
        Self {
            launcher,
            workers: available_parallelism(),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Use at most `workers` processes, never more than the available parallelism.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, available_parallelism());
        self
    }

    /// Set how often finished workers are reaped.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Effective pool size.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Write each configuration into `config_dir` and run them all.
    ///
    /// A worker exiting unsuccessfully is recorded as a failure of its
    /// configuration without affecting the others.
    ///
    /// # Errors
    ///
    /// Returns error if configurations cannot be written or workers cannot
    /// be observed. Running workers are killed in that case.
    pub async fn run(&self, configs: &[Config], config_dir: &Path) -> Result<DispatchReport> {
        let mut queue = VecDeque::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            let path = config_dir.join(format!("config_{index}.json"));
            atomic_write(&path, &serde_json::to_vec_pretty(config)?)?;
            queue.push_back((index, path));
        }

        let total = configs.len();
        info!(total, workers = self.workers, "dispatching grid to worker processes");

        let mut report = DispatchReport::default();
        let mut running: Vec<(usize, Child)> = Vec::with_capacity(self.workers);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            while running.len() < self.workers {
                let Some((index, path)) = queue.pop_front() else {
                    break;
                };
                match self.launcher.spawn(&path) {
                    Ok(child) => {
                        debug!(run = index + 1, pid = child.id(), "worker started");
                        running.push((index, child));
                    }
                    Err(e) => {
                        warn!(run = index + 1, error = %e, "failed to start worker");
                        report.failures.push(RunFailure {
                            index,
                            config: configs[index].clone(),
                            message: format!("failed to start worker: {e}"),
                        });
                    }
                }
            }
            if running.is_empty() && queue.is_empty() {
                break;
            }

            ticker.tick().await;

            let mut still_running = Vec::with_capacity(running.len());
            for (index, mut child) in running.drain(..) {
                let Some(status) = child.try_wait()? else {
                    still_running.push((index, child));
                    continue;
                };
                let mut stdout = String::new();
                if let Some(mut out) = child.stdout.take() {
                    out.read_to_string(&mut stdout).await?;
                }
                if status.success() {
                    let run_id = stdout.lines().last().map(|l| l.trim().to_string());
                    info!(run = index + 1, run_id = run_id.as_deref().unwrap_or("-"), "run finished");
                    report.completed.push(CompletedRun { index, run_id });
                } else {
                    warn!(run = index + 1, %status, config = %serde_json::Value::Object(configs[index].clone()), "run failed");
                    report.failures.push(RunFailure {
                        index,
                        config: configs[index].clone(),
                        message: format!("worker exited with {status}"),
                    });
                }
            }
            running = still_running;
            info!(
                running = running.len(),
                finished = report.finished(),
                total,
                "grid progress"
            );
        }

        Ok(report)
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}
