//! Grid aggregation: reshape the runs of one sweep into a dense array
//!
//! Every run of a grid carries the same grid id in its configuration. The
//! aggregator collects those runs, discovers which configuration keys vary
//! between them, and lays their metric series out over
//! `(varying keys..., metric, step)`.
//!
//! ```text
//! run 1 {x: 1, seed: 3}  loss@0=0.5            x ∈ {1, 2}
//! run 2 {x: 2, seed: 4}  loss@0=0.7   ──►      metric ∈ {loss}
//! run 3 {x: 1, seed: 5}  loss@0=0.6            step ∈ {0}
//! ```
//!
//! Keys with a single value across the grid are pruned from the array and
//! kept aside in [`AggregatedGrid::pruned`]. A key whose values mix
//! integers and floats becomes an all-float axis. Records are filled in
//! repository order, so when two runs land on the same coordinates the
//! later run wins.
//!
//! # Example
//!
//! ```rust
//! use gridrun::config::GridId;
//! use gridrun::experiment::{ExperimentRepository, MemoryRepository, RunRecord, RunStatus};
//! use gridrun::grid::{Coord, GridAggregator};
//! use serde_json::json;
//!
//! let repo = MemoryRepository::new();
//! for (x, loss) in [(1, 0.5), (2, 0.7)] {
//!     let config = json!({"grid_id": "g", "x": x}).as_object().unwrap().clone();
//!     let run = RunRecord::builder("demo", config)
//!         .metric("loss", 0, loss)
//!         .status(RunStatus::Completed)
//!         .build();
//!     repo.create(run)?;
//! }
//!
//! let grid = GridAggregator::new().aggregate(&repo, &GridId::new("g"))?;
//! let loss = grid.array().lookup(&[Coord::Int(2), Coord::from("loss"), Coord::Int(0)]);
//! assert_eq!(loss, Some(0.7));
//! # Ok::<(), gridrun::Error>(())
//! ```

mod array;
mod coord;
mod table;

pub use array::{AggregatedArray, Axis};
pub use coord::Coord;
pub use table::{
    from_record_batches, read_csv, read_parquet, to_record_batch, write_csv, write_parquet,
    VALUE_COLUMN,
};

use crate::config::{GridId, GRID_ID_KEY};
use crate::experiment::{ExperimentRepository, RunRecord};
use crate::{Error, Result};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

/// Name of the synthetic axis holding metric names.
pub const METRIC_AXIS: &str = "metric";

/// Name of the synthetic axis holding step indices.
pub const STEP_AXIS: &str = "step";

/// Configuration keys excluded from the axes unless configured otherwise.
pub const DEFAULT_EXCLUDE_KEYS: &[&str] = &["seed"];

/// Builds [`AggregatedGrid`]s from run records.
#[derive(Debug, Clone)]
pub struct GridAggregator {
    exclude_keys: BTreeSet<String>,
    grid_key: String,
}

impl Default for GridAggregator {
    fn default() -> Self {
        Self {
            exclude_keys: DEFAULT_EXCLUDE_KEYS.iter().map(ToString::to_string).collect(),
            grid_key: GRID_ID_KEY.to_string(),
        }
    }
}

impl GridAggregator {
    /// Aggregator excluding `seed` and matching runs on `grid_id`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the excluded configuration keys (dotted paths).
    #[must_use]
    pub fn with_exclude_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Match runs on another configuration key.
    #[must_use]
    pub fn with_grid_key(mut self, key: impl Into<String>) -> Self {
        self.grid_key = key.into();
        self
    }

    /// Collect and aggregate every run tagged with `grid_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyGrid`] when no run matches, or a repository
    /// error naming the malformed record.
    pub fn aggregate<R>(&self, repo: &R, grid_id: &GridId) -> Result<AggregatedGrid>
    where
        R: ExperimentRepository + ?Sized,
    {
        let records = repo.find_by_config_key(&self.grid_key, &grid_id.to_value())?;
        info!(grid_id = %grid_id, runs = records.len(), "aggregating grid");
        if records.is_empty() {
            return Err(Error::EmptyGrid {
                key: self.grid_key.clone(),
                value: grid_id.to_string(),
            });
        }
        self.aggregate_records(&records)
    }

    /// Aggregate an explicit collection of runs, in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyGrid`] for an empty collection, or a
    /// configuration error when a varying key is named like a synthetic axis.
    pub fn aggregate_records(&self, records: &[RunRecord]) -> Result<AggregatedGrid> {
        if records.is_empty() {
            return Err(Error::EmptyGrid {
                key: self.grid_key.clone(),
                value: "-".to_string(),
            });
        }

        let mut coords: Vec<BTreeMap<String, Coord>> = records
            .iter()
            .map(|run| {
                run.flat_config()
                    .iter()
                    .filter(|(key, _)| !self.exclude_keys.contains(key.as_str()))
                    .map(|(key, value)| (key.clone(), Coord::from_value(value)))
                    .collect()
            })
            .collect();
        promote_mixed_numbers(&mut coords);

        let keys: BTreeSet<&String> = coords.iter().flat_map(BTreeMap::keys).collect();
        let mut pruned = BTreeMap::new();
        let mut config_axes = Vec::new();
        for key in keys {
            // runs without the key sit at null on that axis
            let domain: BTreeSet<&Coord> = coords
                .iter()
                .map(|c| c.get(key).unwrap_or(&Coord::Null))
                .collect();
            if domain.len() == 1 {
                if let Some(value) = domain.into_iter().next() {
                    pruned.insert(key.clone(), value.clone());
                }
                continue;
            }
            if key == METRIC_AXIS || key == STEP_AXIS {
                return Err(Error::Configuration(format!(
                    "configuration key '{key}' varies across the grid and collides with the {key} axis"
                )));
            }
            config_axes.push(Axis::new(key.clone(), domain.into_iter().cloned()));
        }

        let metric_names: BTreeSet<&str> =
            records.iter().flat_map(|run| run.metrics().names()).collect();
        let steps: BTreeSet<u64> = records
            .iter()
            .flat_map(|run| run.metrics().iter())
            .flat_map(|(_, series)| series.keys().copied())
            .collect();

        let n_config_axes = config_axes.len();
        let mut axes = config_axes;
        axes.push(Axis::new(METRIC_AXIS, metric_names.into_iter().map(Coord::from)));
        axes.push(Axis::new(STEP_AXIS, steps.into_iter().map(Coord::from)));
        let mut array = AggregatedArray::new(axes)?;

        let mut runs = FxHashMap::default();
        let mut index = vec![0; n_config_axes + 2];
        for (run, run_coords) in records.iter().zip(&coords) {
            let mut key = Vec::with_capacity(n_config_axes);
            for (slot, axis) in index.iter_mut().zip(&array.axes()[..n_config_axes]) {
                let coord = run_coords.get(axis.name()).unwrap_or(&Coord::Null);
                *slot = axis.position(coord).ok_or_else(|| {
                    Error::repository(run.run_id(), format!("no coordinate for {}", axis.name()))
                })?;
                key.push(coord.clone());
            }
            for (name, series) in run.metrics().iter() {
                index[n_config_axes] = array.axes()[n_config_axes]
                    .position(&Coord::from(name))
                    .ok_or_else(|| Error::repository(run.run_id(), format!("unknown metric {name}")))?;
                for (&step, &value) in series {
                    index[n_config_axes + 1] = array.axes()[n_config_axes + 1]
                        .position(&Coord::from(step))
                        .ok_or_else(|| Error::repository(run.run_id(), format!("unknown step {step}")))?;
                    if let Some(cell) = array.get_mut(&index) {
                        *cell = Some(value);
                    }
                }
            }
            debug!(run_id = run.run_id(), "run filled");
            runs.insert(key, run.run_id().to_string());
        }

        let grid = AggregatedGrid {
            array,
            pruned,
            runs,
        };
        for (name, size) in grid.axis_sizes() {
            info!(axis = name, size, "axis");
        }
        info!(cells = grid.array.len(), filled = grid.array.filled(), "grid aggregated");
        Ok(grid)
    }
}

/// Axes holding both integers and floats (`lr: [1, 0.1]`) store every
/// number as a float, which is also how the exported table types them.
#[allow(clippy::cast_precision_loss)]
fn promote_mixed_numbers(coords: &mut [BTreeMap<String, Coord>]) {
    let mut ints = BTreeSet::new();
    let mut floats = BTreeSet::new();
    for run in coords.iter() {
        for (key, coord) in run {
            match coord {
                Coord::Int(_) => ints.insert(key.clone()),
                Coord::Float(_) => floats.insert(key.clone()),
                _ => false,
            };
        }
    }
    let mixed: BTreeSet<&String> = ints.intersection(&floats).collect();
    if mixed.is_empty() {
        return;
    }
    for run in coords.iter_mut() {
        for (key, coord) in run.iter_mut() {
            if let Coord::Int(i) = coord {
                if mixed.contains(key) {
                    *coord = Coord::Float(*i as f64);
                }
            }
        }
    }
}

/// Result of aggregating one grid.
#[derive(Debug, Clone)]
pub struct AggregatedGrid {
    array: AggregatedArray,
    pruned: BTreeMap<String, Coord>,
    runs: FxHashMap<Vec<Coord>, String>,
}

impl AggregatedGrid {
    /// The metric array over `(varying keys..., metric, step)`.
    #[must_use]
    pub const fn array(&self) -> &AggregatedArray {
        &self.array
    }

    /// Take the metric array.
    #[must_use]
    pub fn into_array(self) -> AggregatedArray {
        self.array
    }

    /// Keys dropped because every run had the same value, with that value.
    #[must_use]
    pub const fn pruned(&self) -> &BTreeMap<String, Coord> {
        &self.pruned
    }

    /// Run that filled the cells at the given configuration coordinates,
    /// one per varying key in axis order.
    #[must_use]
    pub fn run_at(&self, coords: &[Coord]) -> Option<&str> {
        self.runs.get(coords).map(String::as_str)
    }

    /// Number of distinct configuration coordinates filled.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// `(axis name, size)` for every axis of the array.
    #[must_use]
    pub fn axis_sizes(&self) -> Vec<(&str, usize)> {
        self.array
            .axes()
            .iter()
            .map(|axis| (axis.name(), axis.len()))
            .collect()
    }

    /// Export filled cells to a CSV table.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        write_csv(&self.array, path)
    }

    /// Export filled cells to a Parquet file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub fn write_parquet(&self, path: &Path) -> Result<()> {
        write_parquet(&self.array, path)
    }
}
