//! Grid aggregation benchmarks
//!
//! Synthetic sweeps of increasing size: three swept keys, a seed that is
//! excluded, two metrics logged over a variable number of steps.
//!
//! Run with: cargo bench --bench aggregation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gridrun::config::expand;
use gridrun::experiment::{RunRecord, RunStatus};
use gridrun::grid::{to_record_batch, GridAggregator};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

/// Runs for a `side`^3 grid, each logging up to `max_steps` steps.
fn synthetic_runs(side: usize, max_steps: u64) -> Vec<RunRecord> {
    let axis: Vec<usize> = (0..side).collect();
    let grid = json!({
        "grid_id": "bench",
        "lr": axis.iter().map(|i| 10f64.powi(-(*i as i32))).collect::<Vec<_>>(),
        "width": axis.iter().map(|i| 32 * (i + 1)).collect::<Vec<_>>(),
        "opt": {"name": axis.iter().map(|i| format!("opt{i}")).collect::<Vec<_>>()},
    });
    let configs = expand(grid.as_object().unwrap()).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    configs
        .into_iter()
        .enumerate()
        .map(|(i, mut config)| {
            config.insert("seed".into(), json!(rng.gen::<u32>()));
            let mut builder = RunRecord::builder("bench", config).run_id(i.to_string());
            for step in 0..rng.gen_range(1..=max_steps) {
                builder = builder
                    .metric("loss", step, rng.gen::<f64>())
                    .metric("accuracy", step, rng.gen::<f64>());
            }
            builder.status(RunStatus::Completed).build()
        })
        .collect()
}

fn bench_aggregate_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_records");
    let aggregator = GridAggregator::new();

    for side in [4, 8, 16] {
        let runs = synthetic_runs(side, 50);
        group.bench_with_input(BenchmarkId::new("runs", runs.len()), &runs, |b, runs| {
            b.iter(|| aggregator.aggregate_records(black_box(runs)).unwrap());
        });
    }

    group.finish();
}

fn bench_table_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_export");

    for side in [4, 8, 16] {
        let grid = GridAggregator::new()
            .aggregate_records(&synthetic_runs(side, 50))
            .unwrap();
        group.bench_with_input(
            BenchmarkId::new("record_batch", grid.array().filled()),
            grid.array(),
            |b, array| {
                b.iter(|| to_record_batch(black_box(array)).unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_aggregate_records, bench_table_export);
criterion_main!(benches);
