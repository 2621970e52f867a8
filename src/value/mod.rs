//! # Value Type System
//!
//! Core value types for input records: Null, Bool, Int, Float, Str, List.
//! Records are flat mappings from attribute name to value; a missing
//! attribute resolves to an "absent" sentinel that makes every comparison
//! false instead of raising.
//!
//! ## Usage
//!
//! ```rust
//! use ruleflow::value::{DataRecord, Value};
//!
//! let mut record = DataRecord::new();
//! record.insert("issue", Value::Int(35));
//! record.insert("title", Value::from("Superman"));
//!
//! assert_eq!(record.get("issue").and_then(Value::as_f64), Some(35.0));
//! assert!(record.get("missing").is_none());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single attribute value on an input record.
///
/// The variant set is deliberately small: rule constants and record
/// attributes are scalars or lists of scalars. Nested objects arriving in
/// JSON input are not representable and collapse to `Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Explicit null (distinct from an absent attribute)
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Homogeneous or mixed list of scalars
    List(Vec<Value>),
}

impl Value {
    /// Numeric view of the value.
    ///
    /// Integers and floats convert directly; strings convert only when the
    /// whole string parses as a number (unambiguous coercion). Everything
    /// else is non-numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// String view of the value, coercing scalars to their display form.
    pub fn coerce_string(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::List(_) => None,
        }
    }

    /// Borrowed string view without coercion.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// List view of the value.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Loose equality used by the `equal` operator: numeric comparison when
    /// both sides coerce to numbers, string comparison otherwise.
    ///
    /// NaN never equals anything, matching the comparison semantics of the
    /// ordering operators.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a == b;
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::List(a), Value::List(b)) => a == b,
            _ => match (self.coerce_string(), other.coerce_string()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Convert a `serde_json::Value` scalar or array into a [`Value`].
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(_) => Value::Null,
        }
    }

    /// Convert back to a `serde_json::Value` for output snapshots.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "\"{}\"", s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A flat input record: attribute name → value.
///
/// This is the execution-time data dictionary. DMN decision outputs enrich
/// it in place so downstream decisions see upstream results as inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataRecord {
    fields: HashMap<String, Value>,
}

impl DataRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        DataRecord {
            fields: HashMap::new(),
        }
    }

    /// Build a record from a JSON object.
    ///
    /// Returns `None` when the JSON value is not an object: records are
    /// always flat mappings.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        let obj = json.as_object()?;
        let fields = obj
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect();
        Some(DataRecord { fields })
    }

    /// Snapshot the record as a JSON object (for execution logs).
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }

    /// Look up an attribute. Missing attributes are `None`, never an error.
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.fields.get(attribute)
    }

    /// Insert or replace an attribute.
    pub fn insert(&mut self, attribute: impl Into<String>, value: Value) {
        self.fields.insert(attribute.into(), value);
    }

    /// Whether the record carries the attribute.
    pub fn contains(&self, attribute: &str) -> bool {
        self.fields.contains_key(attribute)
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record is empty.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over attributes in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

impl FromIterator<(String, Value)> for DataRecord {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        DataRecord {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Value::Int(42).as_f64(), Some(42.0));
        assert_eq!(Value::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::Str("30".into()).as_f64(), Some(30.0));
        assert_eq!(Value::Str(" 2.5 ".into()).as_f64(), Some(2.5));
        assert_eq!(Value::Str("abc".into()).as_f64(), None);
        assert_eq!(Value::Bool(true).as_f64(), None);
        assert_eq!(Value::List(vec![]).as_f64(), None);
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Int(5).loosely_equals(&Value::Float(5.0)));
        assert!(Value::Str("5".into()).loosely_equals(&Value::Int(5)));
        assert!(Value::Str("DC".into()).loosely_equals(&Value::Str("DC".into())));
        assert!(!Value::Str("DC".into()).loosely_equals(&Value::Str("Marvel".into())));
        assert!(Value::Null.loosely_equals(&Value::Null));
        assert!(!Value::Float(f64::NAN).loosely_equals(&Value::Float(f64::NAN)));
    }

    #[test]
    fn test_record_from_json() {
        let json = serde_json::json!({
            "issue": 35,
            "title": "Superman",
            "tags": ["DC", "classic"],
            "rating": 4.5
        });
        let record = DataRecord::from_json(&json).unwrap();

        assert_eq!(record.get("issue"), Some(&Value::Int(35)));
        assert_eq!(record.get("title"), Some(&Value::Str("Superman".into())));
        assert_eq!(record.get("rating"), Some(&Value::Float(4.5)));
        assert_eq!(
            record.get("tags").and_then(Value::as_list).map(<[Value]>::len),
            Some(2)
        );
        assert!(record.get("publisher").is_none());
    }

    #[test]
    fn test_record_rejects_non_object() {
        assert!(DataRecord::from_json(&serde_json::json!([1, 2, 3])).is_none());
        assert!(DataRecord::from_json(&serde_json::json!("text")).is_none());
    }

    #[test]
    fn test_json_round_trip() {
        let json = serde_json::json!({"a": 1, "b": "x", "c": [1.5, "y"], "d": null});
        let record = DataRecord::from_json(&json).unwrap();
        assert_eq!(record.to_json(), json);
    }

    #[test]
    fn test_value_serde_untagged() {
        let v: Value = serde_json::from_str("35").unwrap();
        assert_eq!(v, Value::Int(35));
        let v: Value = serde_json::from_str("[30, 40]").unwrap();
        assert_eq!(v, Value::List(vec![Value::Int(30), Value::Int(40)]));
        let v: Value = serde_json::from_str("\"Superman\"").unwrap();
        assert_eq!(v, Value::Str("Superman".into()));
    }
}
