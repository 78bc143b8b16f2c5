//! File-backed repository
//!
//! Layout, one directory per run under the runs directory:
//!
//! ```text
//! runs/
//! ├── 1/
//! │   ├── config.json    configuration as the adapter received it
//! │   ├── metrics.json   metric name -> step -> value
//! │   ├── cout.txt       captured adapter output
//! │   ├── <artifacts>    copies of attached files
//! │   └── run.json       status, timestamps, result; written last
//! └── 2/ ...
//! ```
//!
//! Ids are claimed with `create_dir`, which is atomic, so separate worker
//! processes writing into the same directory never share an id. A run
//! directory without `run.json` is still being written and is skipped.

use super::run_record::RunHeader;
use super::{ExperimentRepository, MetricSeries, RunRecord};
use crate::config::{flatten, Config};
use crate::{Error, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CONFIG_FILE: &str = "config.json";
const METRICS_FILE: &str = "metrics.json";
const RUN_FILE: &str = "run.json";
const COUT_FILE: &str = "cout.txt";

const MAX_CLAIM_ATTEMPTS: u64 = 10_000;

/// Repository storing each run as a directory of JSON files.
#[derive(Debug, Clone)]
pub struct FileRepository {
    runs_dir: PathBuf,
}

impl FileRepository {
    /// Use `runs_dir` as the repository root. The directory is created lazily.
    #[must_use]
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    /// Root directory holding the run directories.
    #[must_use]
    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Directory of one run.
    #[must_use]
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    /// Numeric run ids present on disk, ascending. Other entries
    /// (e.g. `_sources`) are ignored.
    fn run_ids(&self) -> Result<Vec<u64>> {
        let entries = match fs::read_dir(&self.runs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn claim_run_dir(&self) -> Result<(String, PathBuf)> {
        fs::create_dir_all(&self.runs_dir)?;
        let mut candidate = self.run_ids()?.last().map_or(1, |id| id + 1);
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let dir = self.runs_dir.join(candidate.to_string());
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((candidate.to_string(), dir)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => candidate += 1,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::repository(
            "-",
            format!("could not claim a run directory in {}", self.runs_dir.display()),
        ))
    }

    fn is_complete(&self, run_id: &str) -> bool {
        self.run_dir(run_id).join(RUN_FILE).is_file()
    }

    fn load_config(&self, run_id: &str) -> Result<Config> {
        match read_json::<Value>(&self.run_dir(run_id).join(CONFIG_FILE), run_id, "config")? {
            Value::Object(config) => Ok(config),
            _ => Err(Error::repository(run_id, "config.json is not a mapping")),
        }
    }

    fn load(&self, run_id: &str) -> Result<Option<RunRecord>> {
        if !self.is_complete(run_id) {
            debug!(run_id, "skipping run that is still being written");
            return Ok(None);
        }
        let dir = self.run_dir(run_id);
        let header: RunHeader = read_json(&dir.join(RUN_FILE), run_id, "run header")?;
        let config = self.load_config(run_id)?;
        let metrics_path = dir.join(METRICS_FILE);
        let metrics: MetricSeries = if metrics_path.is_file() {
            read_json(&metrics_path, run_id, "metric series")?
        } else {
            MetricSeries::new()
        };
        let captured_out = fs::read_to_string(dir.join(COUT_FILE)).unwrap_or_default();

        Ok(Some(RunRecord::from_header(
            run_id.to_string(),
            header,
            config,
            metrics,
            captured_out,
        )))
    }
}

impl ExperimentRepository for FileRepository {
    /// Write `record` into a freshly claimed run directory.
    ///
    /// An artifact that can no longer be copied (e.g. a temp file the
    /// adapter removed on exit) still leaves a complete record behind: the
    /// run is stored as failed and an [`Error::AdapterExecution`] is
    /// returned.
    fn create(&self, mut record: RunRecord) -> Result<String> {
        let (run_id, dir) = self.claim_run_dir()?;
        record.assign_run_id(run_id.clone());

        let mut copy_errors = Vec::new();
        let artifacts = std::mem::take(record.artifacts_mut());
        for artifact in artifacts {
            let file_name = Path::new(artifact.name())
                .file_name()
                .map_or_else(|| artifact.name().to_string(), |n| n.to_string_lossy().into_owned());
            let target = dir.join(file_name);
            match fs::copy(artifact.path(), &target) {
                Ok(_) => record.artifacts_mut().push(artifact.relocated(target)),
                Err(e) => copy_errors.push(format!(
                    "cannot copy artifact {}: {e}",
                    artifact.path().display()
                )),
            }
        }
        if !copy_errors.is_empty() {
            record.mark_failed(&copy_errors.join("\n"));
        }

        atomic_write(&dir.join(CONFIG_FILE), &serde_json::to_vec_pretty(record.config())?)?;
        atomic_write(&dir.join(METRICS_FILE), &serde_json::to_vec_pretty(record.metrics())?)?;
        atomic_write(&dir.join(COUT_FILE), record.captured_out().as_bytes())?;
        atomic_write(&dir.join(RUN_FILE), &serde_json::to_vec_pretty(&record.header())?)?;

        if !copy_errors.is_empty() {
            warn!(run_id = %run_id, errors = copy_errors.len(), "run stored without its artifacts");
            return Err(Error::adapter(record.config(), copy_errors.join("; ")));
        }
        debug!(run_id = %run_id, dir = %dir.display(), "run record written");
        Ok(run_id)
    }

    fn get(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.load(run_id)
    }

    fn all(&self) -> Result<Vec<RunRecord>> {
        let mut runs = Vec::new();
        for id in self.run_ids()? {
            if let Some(run) = self.load(&id.to_string())? {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    fn find_by_config_key(&self, key: &str, value: &Value) -> Result<Vec<RunRecord>> {
        let mut runs = Vec::new();
        for id in self.run_ids()? {
            let run_id = id.to_string();
            if !self.is_complete(&run_id) {
                continue;
            }
            // only matching runs pay for loading metrics
            if flatten(&self.load_config(&run_id)?).get(key) != Some(value) {
                continue;
            }
            if let Some(run) = self.load(&run_id)? {
                runs.push(run);
            }
        }
        Ok(runs)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path, run_id: &str, what: &str) -> Result<T> {
    let bytes = fs::read(path)
        .map_err(|e| Error::repository(run_id, format!("cannot read {what}: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::repository(run_id, format!("unparseable {what}: {e}")))
}

/// Write through a temp file and rename, so readers never see partial files.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(
        ".{name}.tmp.{}.{}",
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}
