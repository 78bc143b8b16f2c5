//! # gridrun: parametrized experiment harness
//!
//! gridrun runs one experiment many times over a sweep of configurations and
//! reshapes the recorded metrics into a dense N-dimensional array indexed by
//! the parameters that varied.
//!
//! ## Pipeline
//!
//! - [`config`]: nested configurations, the dotted-path codec and
//!   Cartesian grid expansion
//! - [`dispatch`]: execute configurations serially, on local worker
//!   processes, or as remote batch jobs
//! - [`scheduler`]: batch scheduler plumbing and the job poller
//! - [`experiment`]: run records and the repositories storing them
//! - [`grid`]: aggregation of a finished grid and table export
//!
//! ## Example Usage
//!
//! ```rust
//! use gridrun::adapter::{FnAdapter, RunContext};
//! use gridrun::config::{Config, GridId, GridSpec};
//! use gridrun::dispatch::RunDispatcher;
//! use gridrun::experiment::MemoryRepository;
//! use gridrun::grid::GridAggregator;
//! use serde_json::json;
//!
//! let mut spec = GridSpec::Sweep(json!({"n": [1, 2, 3]}).as_object().unwrap().clone());
//! let grid_id = GridId::new("squares");
//! spec.set_grid_id(&grid_id);
//!
//! let adapter = FnAdapter::new("squares", |config: &Config, ctx: &mut RunContext| {
//!     let n = config["n"].as_f64().unwrap_or_default();
//!     ctx.log_scalar("square", n * n, None);
//!     Ok(None)
//! });
//! let repo = MemoryRepository::new();
//! RunDispatcher::new(&adapter, &repo).run(&spec.configs()?)?;
//!
//! let grid = GridAggregator::new().aggregate(&repo, &grid_id)?;
//! assert_eq!(grid.array().shape(), vec![3, 1, 1]);
//! # Ok::<(), gridrun::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod adapter;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod experiment;
pub mod grid;
pub mod scheduler;
pub mod settings;

pub use error::{Error, Result};
