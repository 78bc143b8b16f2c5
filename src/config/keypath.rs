//! Dotted-path flattening of nested configurations
//!
//! `{"a": {"b": 1}}` flattens to `{"a.b": 1}` and back. Lists are leaves.
//! Empty nested mappings are kept as leaves so they survive a round trip.
//! A key that already contains `.` is passed through by [`flatten`] but is
//! split by [`unflatten`], so round trips only hold for dot-free keys.

use super::{Config, FlatConfig};
use crate::{Error, Result};
use serde_json::{Map, Value};

/// Flatten a nested configuration into dotted-path keys.
///
/// Already-flat configurations flatten to themselves.
#[must_use]
pub fn flatten(config: &Config) -> FlatConfig {
    let mut flat = FlatConfig::new();
    flatten_into(&mut flat, None, config);
    flat
}

fn flatten_into(out: &mut FlatConfig, prefix: Option<&str>, map: &Config) {
    for (key, value) in map {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(child) if !child.is_empty() => flatten_into(out, Some(&path), child),
            leaf => {
                out.insert(path, leaf.clone());
            }
        }
    }
}

/// Rebuild the nested configuration from dotted-path keys.
///
/// # Errors
///
/// Returns [`Error::ConflictingStructure`] when one key requires a mapping
/// where another key already placed a leaf (e.g. both `a` and `a.b`).
pub fn unflatten(flat: &FlatConfig) -> Result<Config> {
    let mut root = Config::new();

    for (key, value) in flat {
        let (parents, leaf) = match key.rsplit_once('.') {
            Some((parents, leaf)) => (Some(parents), leaf),
            None => (None, key.as_str()),
        };

        let mut level = &mut root;
        let mut walked = String::new();
        for segment in parents.into_iter().flat_map(|p| p.split('.')) {
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(segment);
            level = match level
                .entry(segment)
                .or_insert_with(|| Value::Object(Map::new()))
            {
                Value::Object(child) => child,
                _ => {
                    return Err(Error::ConflictingStructure {
                        path: walked,
                        reason: format!("'{key}' needs a mapping where a value is already set"),
                    })
                }
            };
        }

        if level.contains_key(leaf) {
            return Err(Error::ConflictingStructure {
                path: key.clone(),
                reason: "a nested mapping already exists at this path".to_string(),
            });
        }
        level.insert(leaf.to_string(), value.clone());
    }

    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Config {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_flatten_nested() {
        let config = obj(json!({
            "a": 1,
            "b": {"c": 2, "d": 3, "blah": {"foo": 67, "bar": "no"}},
            "e": "lol"
        }));
        let flat = flatten(&config);
        assert_eq!(
            flat,
            obj(json!({
                "a": 1,
                "b.c": 2,
                "b.d": 3,
                "b.blah.foo": 67,
                "b.blah.bar": "no",
                "e": "lol"
            }))
        );
    }

    #[test]
    fn test_flatten_lists_are_leaves() {
        let config = obj(json!({"layers": [64, 32], "opt": {"betas": [0.9, 0.99]}}));
        let flat = flatten(&config);
        assert_eq!(flat["layers"], json!([64, 32]));
        assert_eq!(flat["opt.betas"], json!([0.9, 0.99]));
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let config = obj(json!({"a": {"b": {"c": 1}}, "d": 2}));
        let once = flatten(&config);
        assert_eq!(flatten(&once), once);
    }

    #[test]
    fn test_unflatten_round_trip() {
        let config = obj(json!({"a": {"b": 1, "c": {"d": [1, 2]}}, "e": null, "f": {}}));
        assert_eq!(unflatten(&flatten(&config)).unwrap(), config);
    }

    #[test]
    fn test_unflatten_leaf_then_child_conflicts() {
        let flat = obj(json!({"a": 1, "a.b": 2}));
        let err = unflatten(&flat).unwrap_err();
        assert!(matches!(err, Error::ConflictingStructure { ref path, .. } if path == "a"));
    }

    #[test]
    fn test_unflatten_child_then_leaf_conflicts() {
        let flat = obj(json!({"a.b": 2, "a": 1}));
        let err = unflatten(&flat).unwrap_err();
        assert!(matches!(err, Error::ConflictingStructure { ref path, .. } if path == "a"));
    }

    #[test]
    fn test_unflatten_deep_conflict_reports_prefix() {
        let flat = obj(json!({"x.y": 1, "x.y.z": 2}));
        let err = unflatten(&flat).unwrap_err();
        assert!(err.to_string().contains("x.y"));
    }
}
