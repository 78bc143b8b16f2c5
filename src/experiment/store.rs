//! Experiment repository - where run records are persisted and queried
//!
//! The repository is the only resource shared by concurrently executing
//! runs. Each run is written once under its own id, so writers never
//! contend on the same record.

use super::RunRecord;
use crate::config::flatten;
use crate::Result;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Storage of run records.
///
/// Query methods return records in creation order; aggregation relies on
/// that order for its last-write-wins tie-break.
pub trait ExperimentRepository: Send + Sync {
    /// Persist a finished run and return the id assigned to it.
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be written.
    fn create(&self, record: RunRecord) -> Result<String>;

    /// Fetch one run by id.
    ///
    /// # Errors
    ///
    /// Returns error if the stored record cannot be read.
    fn get(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// Every stored run, in creation order.
    ///
    /// # Errors
    ///
    /// Returns error if any stored record is malformed.
    fn all(&self) -> Result<Vec<RunRecord>>;

    /// Runs whose flattened configuration has `key` equal to `value`.
    ///
    /// # Errors
    ///
    /// Returns error if any stored record is malformed.
    fn find_by_config_key(&self, key: &str, value: &Value) -> Result<Vec<RunRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|run| flatten(run.config()).get(key) == Some(value))
            .collect())
    }
}

impl<R: ExperimentRepository + ?Sized> ExperimentRepository for Arc<R> {
    fn create(&self, record: RunRecord) -> Result<String> {
        (**self).create(record)
    }

    fn get(&self, run_id: &str) -> Result<Option<RunRecord>> {
        (**self).get(run_id)
    }

    fn all(&self) -> Result<Vec<RunRecord>> {
        (**self).all()
    }

    fn find_by_config_key(&self, key: &str, value: &Value) -> Result<Vec<RunRecord>> {
        (**self).find_by_config_key(key, value)
    }
}

/// In-memory repository using a concurrent hashmap.
///
/// Ids are sequential integers starting at 1. Data is lost when the
/// process exits; use [`FileRepository`](super::FileRepository) to persist.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    runs: DashMap<u64, RunRecord>,
    next_id: AtomicU64,
}

impl MemoryRepository {
    /// Create a new empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Check if the repository is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl ExperimentRepository for MemoryRepository {
    fn create(&self, mut record: RunRecord) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        record.assign_run_id(id.to_string());
        self.runs.insert(id, record);
        Ok(id.to_string())
    }

    fn get(&self, run_id: &str) -> Result<Option<RunRecord>> {
        Ok(run_id
            .parse::<u64>()
            .ok()
            .and_then(|id| self.runs.get(&id).map(|r| r.value().clone())))
    }

    fn all(&self) -> Result<Vec<RunRecord>> {
        let mut runs: Vec<(u64, RunRecord)> = self
            .runs
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        runs.sort_by_key(|(id, _)| *id);
        Ok(runs.into_iter().map(|(_, run)| run).collect())
    }
}
