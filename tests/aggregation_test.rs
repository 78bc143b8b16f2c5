//! Grid aggregation over stored runs
//!
//! Records go through a real repository (memory and on-disk) before being
//! aggregated, the way a finished grid is processed.

use gridrun::config::{Config, GridId};
use gridrun::experiment::{
    ExperimentRepository, FileRepository, MemoryRepository, RunRecord, RunStatus,
};
use gridrun::grid::{read_csv, Coord, GridAggregator, METRIC_AXIS, STEP_AXIS};
use gridrun::Error;
use proptest::prelude::*;
use serde_json::{json, Value};

fn config(value: Value) -> Config {
    value.as_object().unwrap().clone()
}

fn completed(config_value: Value, metrics: &[(&str, u64, f64)]) -> RunRecord {
    let mut builder = RunRecord::builder("agg", config(config_value));
    for &(name, step, value) in metrics {
        builder = builder.metric(name, step, value);
    }
    builder.status(RunStatus::Completed).build()
}

fn loss(x: i64) -> Vec<Coord> {
    vec![Coord::Int(x), Coord::from("loss"), Coord::Int(0)]
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_last_write_wins_for_shared_coordinates() {
    let repo = MemoryRepository::new();
    for (x, value) in [(1, 0.5), (2, 0.7), (1, 0.6)] {
        repo.create(completed(
            json!({"grid_id": "g", "x": x}),
            &[("loss", 0, value)],
        ))
        .unwrap();
    }

    let grid = GridAggregator::new().aggregate(&repo, &GridId::new("g")).unwrap();
    let array = grid.array();
    let names: Vec<&str> = array.axes().iter().map(|a| a.name()).collect();
    assert_eq!(names, vec!["x", METRIC_AXIS, STEP_AXIS]);
    assert_eq!(array.shape(), vec![2, 1, 1]);
    assert_eq!(array.lookup(&loss(1)), Some(0.6));
    assert_eq!(array.lookup(&loss(2)), Some(0.7));
    assert_eq!(grid.run_at(&[Coord::Int(1)]), Some("3"));
}

#[test]
fn test_missing_metric_stays_missing() {
    let repo = MemoryRepository::new();
    repo.create(completed(
        json!({"grid_id": "g", "x": 1}),
        &[("loss", 0, 0.5), ("acc", 0, 0.9)],
    ))
    .unwrap();
    repo.create(completed(json!({"grid_id": "g", "x": 2}), &[("acc", 0, 0.8)]))
        .unwrap();

    let grid = GridAggregator::new().aggregate(&repo, &GridId::new("g")).unwrap();
    let array = grid.array();
    assert_eq!(array.lookup(&loss(1)), Some(0.5));
    assert_eq!(array.lookup(&loss(2)), None);
    assert_eq!(
        array.lookup(&[Coord::Int(2), Coord::from("acc"), Coord::Int(0)]),
        Some(0.8)
    );
    assert_eq!(array.filled(), 3);
}

#[test]
fn test_other_grids_and_seed_are_ignored() {
    let repo = MemoryRepository::new();
    repo.create(completed(json!({"grid_id": "g", "x": 1, "seed": 1}), &[("loss", 0, 0.1)]))
        .unwrap();
    repo.create(completed(json!({"grid_id": "g", "x": 2, "seed": 2}), &[("loss", 0, 0.2)]))
        .unwrap();
    repo.create(completed(json!({"grid_id": "h", "x": 3, "seed": 3}), &[("loss", 0, 0.3)]))
        .unwrap();

    let grid = GridAggregator::new().aggregate(&repo, &GridId::new("g")).unwrap();
    assert_eq!(grid.array().shape(), vec![2, 1, 1]);
    assert!(grid.array().axis("seed").is_none());
    assert_eq!(grid.pruned().get("grid_id"), Some(&Coord::from("g")));
    assert_eq!(grid.run_count(), 2);
}

#[test]
fn test_unknown_grid_is_empty_grid_error() {
    let repo = MemoryRepository::new();
    repo.create(completed(json!({"grid_id": "g", "x": 1}), &[("loss", 0, 0.1)]))
        .unwrap();
    let err = GridAggregator::new()
        .aggregate(&repo, &GridId::new("missing"))
        .unwrap_err();
    assert!(matches!(err, Error::EmptyGrid { ref value, .. } if value == "missing"));
}

#[test]
fn test_nested_and_list_coordinates() {
    let repo = MemoryRepository::new();
    repo.create(completed(
        json!({"grid_id": "g", "model": {"layers": [64, 64]}, "lr": 0.1}),
        &[("loss", 0, 1.0), ("loss", 1, 0.5)],
    ))
    .unwrap();
    repo.create(completed(
        json!({"grid_id": "g", "model": {"layers": [128]}, "lr": 0.1}),
        &[("loss", 0, 2.0)],
    ))
    .unwrap();

    let grid = GridAggregator::new().aggregate(&repo, &GridId::new("g")).unwrap();
    let array = grid.array();
    let layers = array.axis("model.layers").unwrap();
    assert_eq!(layers.len(), 2);
    assert_eq!(array.shape(), vec![2, 1, 2]);
    assert_eq!(grid.pruned().get("lr"), Some(&Coord::Float(0.1)));

    let wide = Coord::Tuple(vec![Coord::Int(128)]);
    assert_eq!(
        array.lookup(&[wide.clone(), Coord::from("loss"), Coord::Int(0)]),
        Some(2.0)
    );
    // shorter series leave later steps missing
    assert_eq!(array.lookup(&[wide, Coord::from("loss"), Coord::Int(1)]), None);
}

#[test]
fn test_file_repository_grid_exports_to_csv() {
    let dir = tempfile::tempdir().unwrap();
    let repo = FileRepository::new(dir.path().join("runs"));
    for (x, value) in [(1, 0.5), (2, 0.7)] {
        repo.create(completed(json!({"grid_id": "g", "x": x}), &[("loss", 0, value)]))
            .unwrap();
    }

    let grid = GridAggregator::new().aggregate(&repo, &GridId::new("g")).unwrap();
    let path = dir.path().join("grid_outputs").join("g").join("g.csv");
    grid.write_csv(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().next(), Some("x,metric,step,metrics"));
    assert_eq!(text.lines().count(), 3);
    assert_eq!(&read_csv(&path).unwrap(), grid.array());
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: every logged (config, metric, step) lands in its cell and
    /// every other cell is missing
    #[test]
    fn prop_aggregation_places_every_point(
        points in proptest::collection::btree_map(
            (0i64..4, 0i64..3, 0u64..3),
            -100.0f64..100.0,
            1..20,
        )
    ) {
        let repo = MemoryRepository::new();
        for (&(a, b, step), &value) in &points {
            repo.create(completed(
                json!({"grid_id": "p", "a": a, "b": b}),
                &[("m", step, value)],
            ))
            .unwrap();
        }
        let grid = GridAggregator::new().aggregate(&repo, &GridId::new("p")).unwrap();
        let array = grid.array();
        prop_assert_eq!(array.filled(), points.len());

        for (&(a, b, step), &value) in &points {
            let mut coords = Vec::new();
            if array.axis("a").is_some() {
                coords.push(Coord::Int(a));
            }
            if array.axis("b").is_some() {
                coords.push(Coord::Int(b));
            }
            coords.push(Coord::from("m"));
            coords.push(Coord::from(step));
            prop_assert_eq!(array.lookup(&coords), Some(value));
        }
    }
}
