//! Parameter grid expansion
//!
//! Every key whose (flattened) value is a list becomes a swept axis; every
//! other value is broadcast as a one-element axis. The Cartesian product is
//! produced in standard product order: the last key varies fastest.

use super::{flatten, unflatten, value_kind, Config, FlatConfig, GRID_ID_KEY};
use crate::{Error, Result};
use chrono::Local;
use serde_json::Value;
use std::fmt;

/// Timestamp layout used in generated grid identifiers.
pub const TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Expand a parameter mapping into the Cartesian product of its axes.
///
/// ```rust
/// use gridrun::config::expand;
/// use serde_json::json;
///
/// let grid = json!({"n": [1, 2], "k": [10, 20], "seed": 0});
/// let configs = expand(grid.as_object().unwrap())?;
///
/// assert_eq!(configs.len(), 4);
/// assert_eq!(configs[1]["n"], json!(1));
/// assert_eq!(configs[1]["k"], json!(20));
/// # Ok::<(), gridrun::Error>(())
/// ```
///
/// # Errors
///
/// Returns [`Error::EmptyDomain`] if any axis is an empty list, or a
/// structure error if a product point cannot be unflattened.
pub fn expand(grid: &Config) -> Result<Vec<Config>> {
    let axes: Vec<(String, Vec<Value>)> = flatten(grid)
        .into_iter()
        .map(|(key, value)| match value {
            Value::Array(items) if items.is_empty() => Err(Error::EmptyDomain { key }),
            Value::Array(items) => Ok((key, items)),
            scalar => Ok((key, vec![scalar])),
        })
        .collect::<Result<_>>()?;

    let total: usize = axes.iter().map(|(_, domain)| domain.len()).product();
    let mut configs = Vec::with_capacity(total);
    let mut cursor = vec![0usize; axes.len()];

    for _ in 0..total {
        let point: FlatConfig = axes
            .iter()
            .zip(&cursor)
            .map(|((key, domain), &i)| (key.clone(), domain[i].clone()))
            .collect();
        configs.push(unflatten(&point)?);

        // odometer step, last axis fastest
        for (slot, (_, domain)) in cursor.iter_mut().zip(&axes).rev() {
            *slot += 1;
            if *slot < domain.len() {
                break;
            }
            *slot = 0;
        }
    }

    Ok(configs)
}

/// Expand a grid and apply a per-config transform, e.g. to add derived fields.
///
/// # Errors
///
/// Same conditions as [`expand`].
pub fn expand_with<F>(grid: &Config, mut transform: F) -> Result<Vec<Config>>
where
    F: FnMut(&mut Config),
{
    let mut configs = expand(grid)?;
    configs.iter_mut().for_each(&mut transform);
    Ok(configs)
}

/// A grid as read from disk.
#[derive(Debug, Clone, PartialEq)]
pub enum GridSpec {
    /// Parameter mapping to expand
    Sweep(Config),
    /// Configurations to run verbatim
    Explicit(Vec<Config>),
}

impl GridSpec {
    /// Interpret a parsed document as a grid.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for scalars or lists of non-mappings.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::Sweep(map)),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::Object(map) => Ok(map),
                    other => Err(Error::Configuration(format!(
                        "grid entry {i} must be a mapping, found {}",
                        value_kind(&other)
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(Self::Explicit),
            other => Err(Error::Configuration(format!(
                "a grid must be a mapping or a list of mappings, found {}",
                value_kind(&other)
            ))),
        }
    }

    /// Produce the configurations this grid describes, in submission order.
    ///
    /// # Errors
    ///
    /// Same conditions as [`expand`] for sweeps.
    pub fn configs(&self) -> Result<Vec<Config>> {
        match self {
            Self::Sweep(grid) => expand(grid),
            Self::Explicit(configs) => Ok(configs.clone()),
        }
    }

    /// Whether any configuration of the grid already names a grid id.
    #[must_use]
    pub fn has_grid_id(&self) -> bool {
        match self {
            Self::Sweep(grid) => grid.contains_key(GRID_ID_KEY),
            Self::Explicit(configs) => configs.iter().any(|c| c.contains_key(GRID_ID_KEY)),
        }
    }

    /// Set the grid id on every configuration.
    pub fn set_grid_id(&mut self, id: &GridId) {
        let value = Value::String(id.as_str().to_string());
        match self {
            Self::Sweep(grid) => {
                grid.insert(GRID_ID_KEY.to_string(), value);
            }
            Self::Explicit(configs) => {
                for config in configs {
                    config.insert(GRID_ID_KEY.to_string(), value.clone());
                }
            }
        }
    }
}

/// Identifier correlating every run of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridId(String);

impl GridId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate `<local time>_<label>`, or just the timestamp for an empty label.
    #[must_use]
    pub fn generate(label: &str) -> Self {
        let stamp = Local::now().format(TIME_FORMAT).to_string();
        if label.is_empty() {
            Self(stamp)
        } else {
            Self(format!("{stamp}_{label}"))
        }
    }

    /// Identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The value stored under [`GRID_ID_KEY`] in run configurations.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::String(self.0.clone())
    }
}

impl fmt::Display for GridId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The grid id shared by every configuration, if there is exactly one.
#[must_use]
pub fn shared_grid_id(configs: &[Config]) -> Option<GridId> {
    let first = configs.first()?.get(GRID_ID_KEY)?;
    if !configs.iter().all(|c| c.get(GRID_ID_KEY) == Some(first)) {
        return None;
    }
    Some(match first {
        Value::String(s) => GridId::new(s.clone()),
        other => GridId::new(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Config {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_expand_product_order() {
        let configs = expand(&obj(json!({"n": [1, 2], "k": [10, 20]}))).unwrap();
        let pairs: Vec<(i64, i64)> = configs
            .iter()
            .map(|c| (c["n"].as_i64().unwrap(), c["k"].as_i64().unwrap()))
            .collect();
        assert_eq!(pairs, vec![(1, 10), (1, 20), (2, 10), (2, 20)]);
    }

    #[test]
    fn test_expand_broadcasts_scalars() {
        let configs = expand(&obj(json!({"n": [1, 2, 3], "d": 5, "name": "x"}))).unwrap();
        assert_eq!(configs.len(), 3);
        assert!(configs.iter().all(|c| c["d"] == json!(5) && c["name"] == json!("x")));
    }

    #[test]
    fn test_expand_nested_axes() {
        let grid = obj(json!({"model": {"depth": [2, 4], "act": "relu"}, "lr": [0.1, 0.01]}));
        let configs = expand(&grid).unwrap();
        assert_eq!(configs.len(), 4);
        assert_eq!(configs[0]["model"], json!({"depth": 2, "act": "relu"}));
        assert_eq!(configs[3]["model"]["depth"], json!(4));
        assert_eq!(configs[3]["lr"], json!(0.01));
    }

    #[test]
    fn test_expand_empty_axis_fails() {
        let err = expand(&obj(json!({"n": [1], "opt": {"lr": []}}))).unwrap_err();
        assert!(matches!(err, Error::EmptyDomain { ref key } if key == "opt.lr"));
    }

    #[test]
    fn test_expand_empty_grid_yields_single_config() {
        let configs = expand(&Config::new()).unwrap();
        assert_eq!(configs, vec![Config::new()]);
    }

    #[test]
    fn test_expand_with_derived_field() {
        let configs = expand_with(&obj(json!({"n": [10, 100], "k": [2]})), |c| {
            let ratio = (c["n"].as_f64().unwrap()).ln() / c["k"].as_f64().unwrap();
            c.insert("logn_over_k".into(), json!(ratio));
        })
        .unwrap();
        assert!(configs.iter().all(|c| c.contains_key("logn_over_k")));
    }

    #[test]
    fn test_grid_spec_explicit_list() {
        let spec = GridSpec::from_value(json!([{"n": 1}, {"n": 2}])).unwrap();
        assert_eq!(spec.configs().unwrap().len(), 2);
        assert!(GridSpec::from_value(json!([1, 2])).is_err());
        assert!(GridSpec::from_value(json!(3)).is_err());
    }

    #[test]
    fn test_set_grid_id_and_shared() {
        let mut spec = GridSpec::Sweep(obj(json!({"n": [1, 2]})));
        assert!(!spec.has_grid_id());
        let id = GridId::new("2024-01-01-00-00-00_test");
        spec.set_grid_id(&id);
        let configs = spec.configs().unwrap();
        assert_eq!(shared_grid_id(&configs), Some(id));
    }

    #[test]
    fn test_shared_grid_id_differs() {
        let configs = vec![obj(json!({"grid_id": "a"})), obj(json!({"grid_id": "b"}))];
        assert_eq!(shared_grid_id(&configs), None);
        assert_eq!(shared_grid_id(&[obj(json!({"n": 1}))]), None);
    }

    #[test]
    fn test_generate_grid_id_has_label() {
        let id = GridId::generate("sweep");
        assert!(id.as_str().ends_with("_sweep"));
        assert_eq!(GridId::generate("").as_str().len(), "2024-01-01-00-00-00".len());
    }
}
