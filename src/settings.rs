//! Tool settings: storage layout and tunables
//!
//! Settings come from defaults, then an optional `gridrun.yaml`, then the
//! `GRIDRUN_FILE_ROOT` environment variable, then command-line flags.
//!
//! ```text
//! <file_root>/
//! ├── runs/                     one directory per run
//! ├── temp_configs/             batch configs of grids without a shared id
//! └── grid_outputs/<grid_id>/
//!     ├── temp_configs/         config_<i>.json for batch jobs
//!     ├── slurm_job_ids.txt     ids of submitted jobs, one per line
//!     └── <grid_id>.csv         exported aggregation
//! ```

use crate::config::GridId;
use crate::grid::DEFAULT_EXCLUDE_KEYS;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the working directory.
pub const SETTINGS_FILE: &str = "gridrun.yaml";

/// Environment variable overriding the storage root.
pub const FILE_ROOT_ENV: &str = "GRIDRUN_FILE_ROOT";

/// File listing submitted batch job ids inside a grid output directory.
pub const JOB_IDS_FILE: &str = "slurm_job_ids.txt";

/// Harness settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Root of all stored data.
    pub file_root: PathBuf,
    /// Directory name of the run repository under the root.
    pub runs_dir: String,
    /// Directory name of per-grid outputs under the root.
    pub grid_outputs_dir: String,
    /// Directory name for serialized batch configurations.
    pub temp_configs_dir: String,
    /// Configuration keys never used as aggregation axes.
    pub exclude_keys: Vec<String>,
    /// Milliseconds between checks on local worker processes.
    pub parallel_poll_ms: u64,
    /// Seconds between batch job status queries.
    pub job_poll_secs: u64,
    /// Consecutive transient status query failures tolerated.
    pub job_query_retries: u32,
    /// Local worker processes; defaults to the available parallelism.
    pub workers: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            file_root: PathBuf::from("file_storage"),
            runs_dir: "runs".to_string(),
            grid_outputs_dir: "grid_outputs".to_string(),
            temp_configs_dir: "temp_configs".to_string(),
            exclude_keys: DEFAULT_EXCLUDE_KEYS.iter().map(ToString::to_string).collect(),
            parallel_poll_ms: 1000,
            job_poll_secs: 10,
            job_query_retries: 3,
            workers: None,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or has unknown fields.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text)
            .map_err(|e| Error::Configuration(format!("settings {}: {e}", path.display())))
    }

    /// Load `gridrun.yaml` from `dir` if present, else defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but is invalid.
    pub fn discover(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment overrides through `lookup`.
    #[must_use]
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(root) = lookup(FILE_ROOT_ENV).filter(|r| !r.is_empty()) {
            self.file_root = PathBuf::from(root);
        }
        self
    }

    /// Set the storage root.
    #[must_use]
    pub fn with_file_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = root.into();
        self
    }

    /// Set the number of local workers.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Directory holding run records.
    #[must_use]
    pub fn runs_path(&self) -> PathBuf {
        self.file_root.join(&self.runs_dir)
    }

    /// Output directory of one grid.
    #[must_use]
    pub fn grid_output_dir(&self, grid_id: &GridId) -> PathBuf {
        self.file_root
            .join(&self.grid_outputs_dir)
            .join(grid_id.as_str())
    }

    /// Where batch configurations are written: inside the grid's output
    /// directory when the grid has an id, otherwise under the root.
    #[must_use]
    pub fn temp_configs_path(&self, grid_id: Option<&GridId>) -> PathBuf {
        grid_id.map_or_else(
            || self.file_root.join(&self.temp_configs_dir),
            |id| self.grid_output_dir(id).join(&self.temp_configs_dir),
        )
    }

    /// Job ids file of one grid.
    #[must_use]
    pub fn job_ids_path(&self, grid_id: &GridId) -> PathBuf {
        self.grid_output_dir(grid_id).join(JOB_IDS_FILE)
    }

    /// CSV export of one grid.
    #[must_use]
    pub fn grid_csv_path(&self, grid_id: &GridId) -> PathBuf {
        self.grid_output_dir(grid_id)
            .join(format!("{}.csv", grid_id.as_str()))
    }

    /// Parquet export of one grid.
    #[must_use]
    pub fn grid_parquet_path(&self, grid_id: &GridId) -> PathBuf {
        self.grid_output_dir(grid_id)
            .join(format!("{}.parquet", grid_id.as_str()))
    }

    /// Interval between checks on local workers.
    #[must_use]
    pub const fn parallel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.parallel_poll_ms)
    }

    /// Interval between batch job status queries.
    #[must_use]
    pub const fn job_poll_interval(&self) -> Duration {
        Duration::from_secs(self.job_poll_secs)
    }

    /// Worker count, capped by the available parallelism.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        let available = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        self.workers.map_or(available, |n| n.clamp(1, available))
    }
}
