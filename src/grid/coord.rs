//! Hashable, totally ordered encoding of configuration values
//!
//! JSON arrays become tuples so list-valued parameters can sit in an axis
//! domain; nested objects become their compact JSON text.

use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// One coordinate value along an axis.
///
/// Ordering is numeric across [`Coord::Int`] and [`Coord::Float`] (an
/// integer sorts just before an equal float), otherwise by variant:
/// null, booleans, numbers, strings, tuples.
#[derive(Debug, Clone)]
pub enum Coord {
    /// Missing or JSON null.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integral number.
    Int(i64),
    /// Any other number.
    Float(f64),
    /// String value.
    Str(String),
    /// Encoded list.
    Tuple(Vec<Coord>),
}

impl Coord {
    /// Encode a configuration value.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::from_number(n),
            Value::String(s) => Self::Str(s.clone()),
            Value::Array(items) => Self::Tuple(items.iter().map(Self::from_value).collect()),
            Value::Object(_) => Self::Str(value.to_string()),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn from_number(n: &Number) -> Self {
        if let Some(i) = n.as_i64() {
            Self::Int(i)
        } else if let Some(u) = n.as_u64() {
            Self::Float(u as f64)
        } else {
            Self::Float(n.as_f64().unwrap_or(f64::NAN))
        }
    }

    /// Decode back into a JSON value. Tuples become arrays.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Str(s) => Value::String(s.clone()),
            Self::Tuple(items) => Value::Array(items.iter().map(Self::to_value).collect()),
        }
    }

    /// Numeric value, for ints and floats.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Whether this is [`Coord::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Str(_) => 3,
            Self::Tuple(_) => 4,
        }
    }
}

impl From<&str> for Coord {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Coord {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Coord {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u64> for Coord {
    #[allow(clippy::cast_precision_loss)]
    fn from(u: u64) -> Self {
        i64::try_from(u).map_or(Self::Float(u as f64), Self::Int)
    }
}

impl From<f64> for Coord {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Coord {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl Ord for Coord {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Int(_), Self::Float(b)) => self
                .as_f64()
                .map_or(Ordering::Less, |a| a.total_cmp(b))
                .then(Ordering::Less),
            (Self::Float(a), Self::Int(_)) => other
                .as_f64()
                .map_or(Ordering::Greater, |b| a.total_cmp(&b))
                .then(Ordering::Greater),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Tuple(a), Self::Tuple(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Coord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Coord {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Coord {}

impl Hash for Coord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Str(s) => s.hash(state),
            Self::Tuple(items) => items.hash(state),
        }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => f.write_str(s),
            Self::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn test_lists_become_tuples() {
        let coord = Coord::from_value(&json!([1, [2, "a"]]));
        assert_eq!(
            coord,
            Coord::Tuple(vec![
                Coord::Int(1),
                Coord::Tuple(vec![Coord::Int(2), Coord::from("a")])
            ])
        );
        assert_eq!(coord.to_value(), json!([1, [2, "a"]]));
        assert_eq!(coord.to_string(), "(1, (2, a))");
        assert_eq!(Coord::from_value(&json!([3])).to_string(), "(3,)");
    }

    #[test]
    fn test_objects_become_json_text() {
        assert_eq!(
            Coord::from_value(&json!({"a": 1})),
            Coord::from(r#"{"a":1}"#)
        );
    }

    #[test]
    fn test_numeric_order_across_variants() {
        let domain: BTreeSet<Coord> = [
            Coord::Float(2.5),
            Coord::Int(3),
            Coord::Int(1),
            Coord::Float(1.0),
            Coord::from("x"),
            Coord::Null,
            Coord::Bool(true),
        ]
        .into_iter()
        .collect();
        let ordered: Vec<String> = domain.iter().map(ToString::to_string).collect();
        assert_eq!(ordered, vec!["null", "true", "1", "1.0", "2.5", "3", "x"]);
    }

    #[test]
    fn test_int_and_float_are_distinct() {
        assert_ne!(Coord::Int(1), Coord::Float(1.0));
        assert_eq!(Coord::Float(0.1), Coord::from_value(&json!(0.1)));
    }

    #[test]
    fn test_large_unsigned_is_float() {
        assert!(matches!(Coord::from(u64::MAX), Coord::Float(_)));
        assert_eq!(Coord::from(7_u64), Coord::Int(7));
    }
}
