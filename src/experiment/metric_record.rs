//! Metric Record - time-series metrics for runs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric Record represents a single logged metric data point.
///
/// Points are collected while an adapter runs and folded into a
/// [`MetricSeries`] when the run record is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    key: String,
    step: u64,
    value: f64,
}

impl MetricRecord {
    /// Create a new metric record.
    ///
    /// # Arguments
    ///
    /// * `key` - Metric name/key (e.g., "loss", "accuracy")
    /// * `step` - Training step or epoch number
    /// * `value` - Metric value
    #[must_use]
    pub fn new(key: impl Into<String>, step: u64, value: f64) -> Self {
        Self {
            key: key.into(),
            step,
            value,
        }
    }

    /// Get the metric key/name.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the step/epoch number.
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// Get the metric value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }
}

/// Every metric of one run: metric name -> step -> value.
///
/// Steps are kept sorted. Logging the same step twice keeps the later value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSeries(BTreeMap<String, BTreeMap<u64, f64>>);

impl MetricSeries {
    /// Create an empty series set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold logged points into series, in logging order.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a MetricRecord>) -> Self {
        let mut series = Self::new();
        for record in records {
            series.insert(record.key(), record.step(), record.value());
        }
        series
    }

    /// Record `value` for metric `name` at `step`.
    pub fn insert(&mut self, name: &str, step: u64, value: f64) {
        self.0
            .entry(name.to_string())
            .or_default()
            .insert(step, value);
    }

    /// Series of a single metric.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BTreeMap<u64, f64>> {
        self.0.get(name)
    }

    /// Metric names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Iterate `(name, step -> value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<u64, f64>)> {
        self.0.iter().map(|(name, steps)| (name.as_str(), steps))
    }

    /// Number of distinct metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no metric has been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of `(metric, step)` points.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_record_new() {
        let metric = MetricRecord::new("loss", 0, 0.5);
        assert_eq!(metric.key(), "loss");
        assert_eq!(metric.step(), 0);
        assert!((metric.value() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_series_from_records_sorted_by_step() {
        let records = vec![
            MetricRecord::new("loss", 2, 0.2),
            MetricRecord::new("loss", 0, 1.0),
            MetricRecord::new("acc", 0, 0.1),
            MetricRecord::new("loss", 1, 0.5),
        ];
        let series = MetricSeries::from_records(&records);

        assert_eq!(series.len(), 2);
        assert_eq!(series.point_count(), 4);
        let steps: Vec<u64> = series.get("loss").unwrap().keys().copied().collect();
        assert_eq!(steps, vec![0, 1, 2]);
        assert_eq!(series.names().collect::<Vec<_>>(), vec!["acc", "loss"]);
    }

    #[test]
    fn test_series_repeated_step_last_wins() {
        let records = vec![MetricRecord::new("loss", 0, 1.0), MetricRecord::new("loss", 0, 2.0)];
        let series = MetricSeries::from_records(&records);
        assert_eq!(series.get("loss").unwrap()[&0], 2.0);
    }

    #[test]
    fn test_series_json_shape() {
        let mut series = MetricSeries::new();
        series.insert("loss", 3, 0.25);
        let json = serde_json::to_value(&series).unwrap();
        assert_eq!(json, serde_json::json!({"loss": {"3": 0.25}}));
        let back: MetricSeries = serde_json::from_value(json).unwrap();
        assert_eq!(back, series);
    }
}
