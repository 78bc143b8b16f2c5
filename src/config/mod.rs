//! Configuration model, dotted-path codec and parameter grids
//!
//! A configuration is an arbitrarily nested JSON-style mapping. Insertion
//! order is preserved, which makes grid expansion reproducible for a given
//! input file.
//!
//! ```rust
//! use gridrun::config::{flatten, unflatten};
//! use serde_json::json;
//!
//! let config = json!({"model": {"depth": 4, "act": "relu"}, "lr": 0.1});
//! let config = config.as_object().unwrap();
//!
//! let flat = flatten(config);
//! assert_eq!(flat["model.depth"], json!(4));
//! assert_eq!(&unflatten(&flat)?, config);
//! # Ok::<(), gridrun::Error>(())
//! ```

mod grid;
mod keypath;

pub use grid::{expand, expand_with, shared_grid_id, GridId, GridSpec};
pub use keypath::{flatten, unflatten};

use crate::{Error, Result};
use serde_json::{Map, Number, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Nested configuration mapping.
pub type Config = Map<String, Value>;

/// Configuration whose keys are dotted paths and whose values are leaves.
pub type FlatConfig = Map<String, Value>;

/// Conventional key carrying the grid identifier inside every generated config.
pub const GRID_ID_KEY: &str = "grid_id";

/// Load a single configuration from a `.json`, `.yaml` or `.yml` file.
///
/// # Errors
///
/// Returns error if the file cannot be read, has an unsupported extension,
/// contains a non-string mapping key, or is not a mapping at the top level.
pub fn load_config(path: &Path) -> Result<Config> {
    match load_value(path)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Configuration(format!(
            "{} must contain a mapping at the top level, found {}",
            path.display(),
            value_kind(&other)
        ))),
    }
}

/// Load a grid description: either a parameter mapping to expand or a list
/// of explicit configurations.
///
/// # Errors
///
/// Same conditions as [`load_config`], plus list entries that are not mappings.
pub fn load_grid(path: &Path) -> Result<GridSpec> {
    GridSpec::from_value(load_value(path)?)
}

/// Parse a JSON or YAML document into a configuration value tree.
///
/// # Errors
///
/// Returns error on IO failure, parse failure or unsupported extension.
pub fn load_value(path: &Path) -> Result<Value> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let file = File::open(path).map_err(|e| {
        Error::Configuration(format!("Failed to open {}: {e}", path.display()))
    })?;
    let reader = BufReader::new(file);

    match ext.as_deref() {
        Some("json") => Ok(serde_json::from_reader(reader)?),
        Some("yaml" | "yml") => yaml_to_json(serde_yaml::from_reader(reader)?),
        _ => Err(Error::Configuration(format!(
            "{} is not a JSON or YAML file",
            path.display()
        ))),
    }
}

/// Convert a YAML document into the JSON value model.
///
/// YAML permits non-string mapping keys; those are rejected here.
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] for non-string keys and a configuration error
/// for numbers JSON cannot represent (NaN, infinities).
pub fn yaml_to_json(value: serde_yaml::Value) -> Result<Value> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                Value::Number(Number::from_f64(f).ok_or_else(|| {
                    Error::Configuration(format!("number {n} cannot be represented"))
                })?)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                let Yaml::String(key) = key else {
                    return Err(Error::InvalidKey {
                        key: format!("{key:?}"),
                    });
                };
                map.insert(key, yaml_to_json(value)?);
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

pub(crate) const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
