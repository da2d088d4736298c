use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Open-ended attribute store attached to every entity.
///
/// BTreeMap so that serialized payloads and iteration are canonical.
pub type AttrMap = BTreeMap<String, Value>;

/// An attribute value: numbers, strings, lists, nested maps.
///
/// Untagged so that scene files and store payloads read naturally
/// (`mass: 80` rather than `mass: { Float: 80 }`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Numeric view of the value. `Int` and `Float` are interchangeable.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_num(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_values_are_interchangeable() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::from("three").as_f64(), None);
        assert!(Value::Int(0).is_num());
        assert!(!Value::from("0").is_num());
    }

    #[test]
    fn nested_access() {
        let mut inner = BTreeMap::new();
        inner.insert("depth".to_owned(), Value::Int(2));
        let v = Value::Map(inner);
        assert_eq!(v.as_map().unwrap()["depth"].as_f64(), Some(2.0));
        assert!(v.as_list().is_none());
    }
}
