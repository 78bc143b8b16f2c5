//! Slurm scheduler driven through `sbatch` and `sacct`

use super::{BatchScheduler, JobId, JobState, JobStatus};
use crate::{Error, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Slurm batch scheduler.
///
/// Jobs are submitted by piping the script into `sbatch`; states are read
/// with one `sacct` call per poll.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    sbatch: String,
    sacct: String,
}

impl Default for SlurmScheduler {
    fn default() -> Self {
        Self {
            sbatch: "sbatch".to_string(),
            sacct: "sacct".to_string(),
        }
    }
}

impl SlurmScheduler {
    /// Use `sbatch` and `sacct` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use other programs in place of `sbatch` and `sacct`.
    #[must_use]
    pub fn with_programs(sbatch: impl Into<String>, sacct: impl Into<String>) -> Self {
        Self {
            sbatch: sbatch.into(),
            sacct: sacct.into(),
        }
    }
}

impl BatchScheduler for SlurmScheduler {
    async fn submit(&self, script: &str) -> Result<JobId> {
        let mut child = Command::new(&self.sbatch)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Scheduler(format!("failed to start {}: {e}", self.sbatch)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(Error::Scheduler(format!(
                "{} exited with {}: {}",
                self.sbatch,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let job = parse_submission(&stdout)?;
        debug!(job = %job, "job submitted");
        Ok(job)
    }

    async fn query_status(&self, jobs: &[JobId]) -> Result<Vec<JobStatus>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let ids = jobs.iter().map(JobId::as_str).collect::<Vec<_>>().join(",");
        let output = Command::new(&self.sacct)
            .args(["-j", &ids])
            .args(["-o", "jobid,state,elapsed", "--noheader", "--parsable2", "-X"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Scheduler(format!("failed to start {}: {e}", self.sacct)))?;
        if !output.status.success() {
            return Err(Error::Scheduler(format!(
                "{} exited with {}: {}",
                self.sacct,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_sacct(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Job id from `sbatch` output: the last token of `Submitted batch job 42`,
/// or the leading field of `--parsable` output (`42;cluster`).
fn parse_submission(stdout: &str) -> Result<JobId> {
    stdout
        .split_whitespace()
        .last()
        .and_then(|token| token.split(';').next())
        .filter(|id| !id.is_empty())
        .map(JobId::new)
        .ok_or_else(|| Error::Scheduler(format!("no job id in submission output {stdout:?}")))
}

/// Rows of `sacct --parsable2` output (`jobid|state|elapsed`).
fn parse_sacct(stdout: &str) -> Vec<JobStatus> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().split('|');
            let job_id = fields.next().filter(|id| !id.is_empty())?;
            let state = fields.next()?;
            let elapsed = fields.next().unwrap_or_default();
            Some(JobStatus {
                job_id: JobId::new(job_id),
                state: JobState::classify(state),
                elapsed: elapsed.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submission() {
        assert_eq!(
            parse_submission("Submitted batch job 123456\n").unwrap(),
            JobId::new("123456")
        );
        assert_eq!(parse_submission("77;gpu\n").unwrap(), JobId::new("77"));
        assert!(matches!(parse_submission("\n"), Err(Error::Scheduler(_))));
    }

    #[test]
    fn test_parse_sacct() {
        let out = "101|COMPLETED|00:10:02\n102|RUNNING|00:01:00\n103|CANCELLED by 99|00:00:00\n\n";
        let rows = parse_sacct(out);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].state, JobState::Completed);
        assert_eq!(rows[1].elapsed, "00:01:00");
        assert_eq!(rows[2].state, JobState::OtherTerminal("CANCELLED".into()));
    }

    #[tokio::test]
    async fn test_query_no_jobs_skips_sacct() {
        let scheduler = SlurmScheduler::with_programs("/nonexistent/sbatch", "/nonexistent/sacct");
        assert!(scheduler.query_status(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_sacct_is_scheduler_error() {
        let scheduler = SlurmScheduler::with_programs("/nonexistent/sbatch", "/nonexistent/sacct");
        let err = scheduler.query_status(&[JobId::new("1")]).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_submit_reads_script_from_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-sbatch");
        let captured = dir.path().join("script.sh");
        std::fs::write(
            &fake,
            format!("#!/bin/sh\ncat > {}\necho Submitted batch job 9001\n", captured.display()),
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let scheduler = SlurmScheduler::with_programs(fake.to_string_lossy(), "sacct");
        let job = scheduler.submit("#!/bin/bash\necho hi\n").await.unwrap();
        assert_eq!(job, JobId::new("9001"));
        assert_eq!(std::fs::read_to_string(&captured).unwrap(), "#!/bin/bash\necho hi\n");
    }
}
