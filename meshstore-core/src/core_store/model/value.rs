/*
    value.rs - Dynamic payload tree carried by every record

    A record's `data` is an arbitrary JSON-like tree. Value is the tagged
    union the merge engine recurses over:
    - Null / Bool / Int / Float / String (scalars)
    - Array (opaque to the deep merge, replaced as a unit)
    - Map (merged key by key)

    Values carry a total order used as the deterministic tie-break when two
    replicas wrote the same key at the same timestamp.
*/

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Mapping node of a value tree
pub type ValueMap = BTreeMap<String, Value>;

/// JSON-like value tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    /// Empty mapping
    pub fn empty_map() -> Self {
        Value::Map(ValueMap::new())
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Look up a key when this value is a mapping
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Rank of the variant in the cross-kind order
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Map(_) => 5,
        }
    }

    /// Total order over values.
    ///
    /// Kinds order as `Null < Bool < Number < String < Array < Map`; values of
    /// the same kind use their natural order. Integers and floats compare
    /// numerically, with the integer first when both denote the same number.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }

    /// Deep structural join of two trees.
    ///
    /// Mappings are unioned key by key, recursing where both sides hold a
    /// mapping. Any other collision keeps the greater value under
    /// [`Value::total_cmp`], so the join is commutative, associative and
    /// idempotent.
    pub fn join(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Map(left), Value::Map(right)) => {
                let mut merged = left.clone();
                for (key, incoming) in right {
                    let joined = match merged.get(key) {
                        Some(existing) => existing.join(incoming),
                        None => incoming.clone(),
                    };
                    merged.insert(key.clone(), joined);
                }
                Value::Map(merged)
            }
            _ => {
                if other.total_cmp(self) == Ordering::Greater {
                    other.clone()
                } else {
                    self.clone()
                }
            }
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::empty_map()
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
