//! Artifact Record - files attached to a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Artifact Record represents a file an adapter attached to its run.
///
/// `path` is where the file lives: the adapter's original location until the
/// record is persisted, then the copy owned by the repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    name: String,
    path: PathBuf,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Create a new artifact record.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the artifact file
    /// * `name` - Artifact name/key (e.g., "model.pt", "profile.svg")
    /// * `size_bytes` - Size of the artifact in bytes
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size_bytes,
            created_at: Utc::now(),
        }
    }

    /// Get the artifact name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the artifact location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point the record at a new location (after the file was copied).
    #[must_use]
    pub fn relocated(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Get the artifact size in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
