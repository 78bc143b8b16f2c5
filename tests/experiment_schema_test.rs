//! Run record schema and repository behavior
//!
//! Both repositories are driven through the same checks so the in-memory
//! store stays a faithful stand-in for the on-disk one.

use gridrun::experiment::{
    ArtifactRecord, ExperimentRepository, FileRepository, MemoryRepository, MetricRecord,
    MetricSeries, RunRecord, RunStatus,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn config(value: Value) -> gridrun::config::Config {
    value.as_object().unwrap().clone()
}

// =============================================================================
// RunRecord Tests
// =============================================================================

#[test]
fn test_run_record_lifecycle() {
    let mut run = RunRecord::new("mnist", config(json!({"lr": 0.1})));
    assert_eq!(run.status(), RunStatus::Pending);
    assert!(run.started_at().is_none());

    run.start();
    assert_eq!(run.status(), RunStatus::Running);
    assert!(!run.status().is_finished());

    let mut metrics = MetricSeries::new();
    metrics.insert("loss", 0, 0.9);
    metrics.insert("loss", 1, 0.4);
    run.complete(metrics, Vec::new(), Some(json!({"acc": 0.97})), "done\n".into());

    assert!(run.status().is_finished());
    assert!(run.ended_at().unwrap() >= run.started_at().unwrap());
    assert_eq!(run.metrics().point_count(), 2);
    assert_eq!(run.result(), Some(&json!({"acc": 0.97})));
}

#[test]
fn test_run_record_serialization() {
    let run = RunRecord::builder("mnist", config(json!({"model": {"depth": 3}})))
        .run_id("7")
        .metric("loss", 0, 0.5)
        .status(RunStatus::Failed)
        .build();

    let json = serde_json::to_string(&run).expect("serialization failed");
    let back: RunRecord = serde_json::from_str(&json).expect("deserialization failed");
    assert_eq!(back, run);
    assert!(json.contains(r#""status":"FAILED""#));
    assert_eq!(back.flat_config()["model.depth"], json!(3));
}

// =============================================================================
// MetricRecord Tests
// =============================================================================

#[test]
fn test_metric_series_from_records() {
    let records = [
        MetricRecord::new("loss", 2, 0.2),
        MetricRecord::new("loss", 0, 0.9),
        MetricRecord::new("acc", 0, 0.1),
    ];
    let series = MetricSeries::from_records(&records);
    let names: Vec<&str> = series.names().collect();
    assert_eq!(names, vec!["acc", "loss"]);
    let steps: Vec<u64> = series.get("loss").unwrap().keys().copied().collect();
    assert_eq!(steps, vec![0, 2]);
}

// =============================================================================
// Repository Tests
// =============================================================================

fn exercise_repository(repo: &impl ExperimentRepository) {
    let mut ids = Vec::new();
    for (grid, n) in [("a", 1), ("b", 2), ("a", 3)] {
        let run = RunRecord::builder("repo", config(json!({"grid_id": grid, "opt": {"n": n}})))
            .metric("loss", 0, f64::from(n))
            .status(RunStatus::Completed)
            .build();
        ids.push(repo.create(run).unwrap());
    }
    assert_eq!(ids, vec!["1", "2", "3"]);

    let found = repo.find_by_config_key("grid_id", &json!("a")).unwrap();
    let found_ids: Vec<&str> = found.iter().map(RunRecord::run_id).collect();
    assert_eq!(found_ids, vec!["1", "3"]);

    let nested = repo.find_by_config_key("opt.n", &json!(2)).unwrap();
    assert_eq!(nested.len(), 1);
    assert_eq!(nested[0].metrics().get("loss").unwrap()[&0], 2.0);

    assert!(repo.get("99").unwrap().is_none());
    assert_eq!(repo.all().unwrap().len(), 3);
}

#[test]
fn test_memory_repository_contract() {
    exercise_repository(&MemoryRepository::new());
}

#[test]
fn test_file_repository_contract() {
    let dir = tempfile::tempdir().unwrap();
    exercise_repository(&FileRepository::new(dir.path().join("runs")));
}

#[test]
fn test_shared_repository_contract() {
    exercise_repository(&Arc::new(MemoryRepository::new()));
}

#[test]
fn test_file_repository_keeps_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("weights.bin");
    std::fs::write(&source, [1u8, 2, 3]).unwrap();

    let repo = FileRepository::new(dir.path().join("runs"));
    let mut run = RunRecord::new("art", config(json!({"x": 1})));
    run.start();
    run.complete(
        MetricSeries::new(),
        vec![ArtifactRecord::new(&source, "weights", 3)],
        None,
        String::new(),
    );
    let id = repo.create(run).unwrap();

    let stored = repo.get(&id).unwrap().unwrap();
    let artifact = &stored.artifacts()[0];
    assert_eq!(artifact.name(), "weights");
    assert_eq!(artifact.size_bytes(), 3);
    assert!(artifact.path().starts_with(repo.run_dir(&id)));
    assert_eq!(std::fs::read(artifact.path()).unwrap(), vec![1, 2, 3]);
}
