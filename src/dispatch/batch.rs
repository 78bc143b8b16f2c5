//! Remote batch dispatch
//!
//! One job per configuration: the configuration is written to a file, a
//! job script invoking `gridrun run` on it is rendered from a
//! [`BatchTemplate`], and the script is handed to a [`BatchScheduler`].
//! Submission returns as soon as the scheduler has accepted every job; the
//! jobs store their own records, and completion is observed with a
//! [`JobPoller`](crate::scheduler::JobPoller).

use super::WorkerLauncher;
use crate::config::{load_value, shared_grid_id, Config, GridId};
use crate::experiment::atomic_write;
use crate::scheduler::{BatchScheduler, JobId};
use crate::settings::Settings;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Job script layout shared by every job of a grid.
///
/// ```yaml
/// directives:
///   - --time=01:00:00
///   - --mem=4G
/// setup:
///   - module load cuda
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchTemplate {
    /// Interpreter line.
    pub shebang: String,
    /// Scheduler directives; `#SBATCH ` is prepended unless the line is
    /// already a comment.
    pub directives: Vec<String>,
    /// Shell lines run before the worker command.
    pub setup: Vec<String>,
}

impl Default for BatchTemplate {
    fn default() -> Self {
        Self {
            shebang: "#!/bin/bash".to_string(),
            directives: Vec::new(),
            setup: Vec::new(),
        }
    }
}

impl BatchTemplate {
    /// Load a template from a `.json`, `.yaml` or `.yml` file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or has unknown fields.
    pub fn load(path: &Path) -> Result<Self> {
        serde_json::from_value(load_value(path)?)
            .map_err(|e| Error::Configuration(format!("batch template {}: {e}", path.display())))
    }

    /// Render the job script running `command`.
    #[must_use]
    pub fn render(&self, command: &str) -> String {
        let mut script = String::new();
        script.push_str(&self.shebang);
        script.push('\n');
        for directive in &self.directives {
            if !directive.starts_with('#') {
                script.push_str("#SBATCH ");
            }
            script.push_str(directive);
            script.push('\n');
        }
        for line in &self.setup {
            script.push_str(line);
            script.push('\n');
        }
        script.push_str(command);
        script.push('\n');
        script
    }
}

/// Jobs accepted by the scheduler for one grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSubmission {
    /// Scheduler ids in configuration order.
    pub job_ids: Vec<JobId>,
    /// Grid id shared by every configuration, if any.
    pub grid_id: Option<GridId>,
    /// File the ids were appended to; only set when the grid id is shared.
    pub job_ids_file: Option<PathBuf>,
}

/// Submits one batch job per configuration.
#[derive(Debug, Clone)]
pub struct BatchDispatcher<S> {
    scheduler: S,
    template: BatchTemplate,
    launcher: WorkerLauncher,
}

impl<S: BatchScheduler> BatchDispatcher<S> {
    /// Dispatcher rendering `template` around `launcher`'s worker command.
    pub const fn new(scheduler: S, template: BatchTemplate, launcher: WorkerLauncher) -> Self {
        Self {
            scheduler,
            template,
            launcher,
        }
    }

    /// The scheduler jobs are submitted to.
    pub const fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Submit every configuration and return without waiting.
    ///
    /// Ids are appended to the grid's job ids file as soon as each job is
    /// accepted, so a later `grid-to-csv` can wait on them even if this
    /// submission is interrupted.
    ///
    /// # Errors
    ///
    /// Returns error if a configuration cannot be written or the scheduler
    /// rejects a submission. Jobs submitted before the error keep running.
    pub async fn submit(&self, configs: &[Config], settings: &Settings) -> Result<BatchSubmission> {
        let grid_id = shared_grid_id(configs);
        let job_ids_file = grid_id.as_ref().map(|gid| settings.job_ids_path(gid));
        let config_dir = settings.temp_configs_path(grid_id.as_ref());
        match &grid_id {
            Some(gid) => info!(grid_id = %gid, "all configs share one grid id"),
            None => info!("configs do not share a grid id; job ids will not be saved"),
        }

        let total = configs.len();
        let mut job_ids = Vec::with_capacity(total);
        for (index, config) in configs.iter().enumerate() {
            let path = config_dir.join(format!("config_{index}.json"));
            atomic_write(&path, &serde_json::to_vec_pretty(config)?)?;

            let script = self.template.render(&self.launcher.command_line(&path));
            debug!(run = index + 1, %script, "job script");
            let job_id = self.scheduler.submit(&script).await?;
            if let Some(file) = &job_ids_file {
                append_job_ids(file, std::slice::from_ref(&job_id))?;
            }
            info!(run = index + 1, total, job_id = %job_id, "submitted");
            job_ids.push(job_id);
        }
        info!(jobs = job_ids.len(), "grid submitted");

        Ok(BatchSubmission {
            job_ids,
            grid_id,
            job_ids_file,
        })
    }
}

/// Append ids to a job ids file, one per line, creating it if needed.
///
/// # Errors
///
/// Returns error if the file cannot be written.
pub fn append_job_ids(path: &Path, ids: &[JobId]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for id in ids {
        writeln!(file, "{id}")?;
    }
    Ok(())
}

/// Read a job ids file. A missing file holds no ids.
///
/// # Errors
///
/// Returns error if the file exists but cannot be read.
pub fn read_job_ids(path: &Path) -> Result<Vec<JobId>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(JobId::new)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::JobStatus;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        scripts: Mutex<Vec<String>>,
    }

    impl BatchScheduler for Recording {
        async fn submit(&self, script: &str) -> Result<JobId> {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.push(script.to_string());
            Ok(JobId::new(format!("{}", 100 + scripts.len())))
        }

        async fn query_status(&self, _jobs: &[JobId]) -> Result<Vec<JobStatus>> {
            Ok(Vec::new())
        }
    }

    fn config(value: serde_json::Value) -> Config {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_render_template() {
        let template = BatchTemplate {
            directives: vec!["--time=01:00:00".into(), "#SBATCH --mem=4G".into()],
            setup: vec!["module load cuda".into()],
            ..BatchTemplate::default()
        };
        assert_eq!(
            template.render("gridrun run a.yaml c.json"),
            "#!/bin/bash\n#SBATCH --time=01:00:00\n#SBATCH --mem=4G\nmodule load cuda\ngridrun run a.yaml c.json\n"
        );
    }

    #[test]
    fn test_load_template_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slurm.yaml");
        fs::write(&path, "directives: [--partition=gpu]\n").unwrap();
        let template = BatchTemplate::load(&path).unwrap();
        assert_eq!(template.shebang, "#!/bin/bash");
        assert_eq!(template.directives, vec!["--partition=gpu"]);

        fs::write(&path, "directive: [--partition=gpu]\n").unwrap();
        assert!(matches!(
            BatchTemplate::load(&path),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_job_ids_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid").join("slurm_job_ids.txt");
        assert!(read_job_ids(&path).unwrap().is_empty());

        append_job_ids(&path, &[JobId::new("1")]).unwrap();
        append_job_ids(&path, &[JobId::new("2"), JobId::new("3")]).unwrap();
        assert_eq!(
            read_job_ids(&path).unwrap(),
            vec![JobId::new("1"), JobId::new("2"), JobId::new("3")]
        );
    }

    #[tokio::test]
    async fn test_submit_shared_grid() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default().with_file_root(dir.path());
        let gid = GridId::new("g1");
        let configs = vec![
            config(json!({"grid_id": "g1", "n": 1})),
            config(json!({"grid_id": "g1", "n": 2})),
        ];
        let launcher = WorkerLauncher::new("gridrun", "adapter.yaml", dir.path());
        let dispatcher = BatchDispatcher::new(Recording::default(), BatchTemplate::default(), launcher);

        let submission = dispatcher.submit(&configs, &settings).await.unwrap();
        assert_eq!(submission.job_ids, vec![JobId::new("101"), JobId::new("102")]);
        assert_eq!(submission.grid_id, Some(gid.clone()));
        assert_eq!(
            read_job_ids(&settings.job_ids_path(&gid)).unwrap(),
            submission.job_ids
        );

        let config_path = settings.temp_configs_path(Some(&gid)).join("config_1.json");
        let written: serde_json::Value =
            serde_json::from_slice(&fs::read(&config_path).unwrap()).unwrap();
        assert_eq!(written["n"], 2);

        let scripts = dispatcher.scheduler().scripts.lock().unwrap();
        assert!(scripts[1].starts_with("#!/bin/bash\n"));
        assert!(scripts[1].contains(&*config_path.to_string_lossy()));
    }

    #[tokio::test]
    async fn test_submit_without_shared_grid_keeps_no_ids() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default().with_file_root(dir.path());
        let configs = vec![config(json!({"n": 1})), config(json!({"grid_id": "g2", "n": 2}))];
        let launcher = WorkerLauncher::new("gridrun", "adapter.yaml", dir.path());
        let dispatcher = BatchDispatcher::new(Recording::default(), BatchTemplate::default(), launcher);

        let submission = dispatcher.submit(&configs, &settings).await.unwrap();
        assert_eq!(submission.job_ids.len(), 2);
        assert!(submission.job_ids_file.is_none());
        assert!(settings.temp_configs_path(None).join("config_0.json").is_file());
    }
}
