//! Experiment tracking: run records and the repositories that hold them
//!
//! ## Schema Overview
//!
//! ```text
//! RunRecord (one per adapter execution)
//!     ├── config      nested configuration (flattened on demand)
//!     ├── metrics     MetricSeries: name -> step -> value
//!     └── artifacts   ArtifactRecord (N)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use gridrun::experiment::{ExperimentRepository, MemoryRepository, RunRecord, RunStatus};
//! use serde_json::json;
//!
//! let repo = MemoryRepository::new();
//! let config = json!({"grid_id": "g1", "n": 10}).as_object().unwrap().clone();
//! let run = RunRecord::builder("demo", config)
//!     .metric("loss", 0, 0.5)
//!     .status(RunStatus::Completed)
//!     .build();
//!
//! let id = repo.create(run)?;
//! let found = repo.find_by_config_key("grid_id", &json!("g1"))?;
//! assert_eq!(found[0].run_id(), id);
//! # Ok::<(), gridrun::Error>(())
//! ```

mod artifact_record;
mod file_store;
mod metric_record;
mod run_record;
mod store;

pub use artifact_record::ArtifactRecord;
pub use file_store::FileRepository;
pub(crate) use file_store::atomic_write;
pub use metric_record::{MetricRecord, MetricSeries};
pub use run_record::{RunRecord, RunRecordBuilder, RunStatus};
pub use store::{ExperimentRepository, MemoryRepository};
