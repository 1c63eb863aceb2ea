//! Per-node configuration with typed accessors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key naming the node type.
pub const CLASS_KEY: &str = "class";

/// Key holding the optional type-source hint.
pub const CLASS_PREFIX_KEY: &str = "class_prefix";

/// Key holding the outgoing edges.
pub const DESTINATIONS_KEY: &str = "destinations";

/// Keys from an older document layout that are no longer accepted.
pub const LEGACY_DESTINATION_KEYS: [&str; 4] = [
    "destination_pipeline",
    "destination_models",
    "destination_postprocesses",
    "destination_writer",
];

/// An ordered key/value bag holding one node's declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeConfig {
    values: Map<String, Value>,
}

impl NodeConfig {
    /// Creates a node configuration from a JSON map.
    #[must_use]
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Builds a node configuration from a JSON value, if it is an object.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_object().cloned().map(Self::new)
    }

    /// Returns the raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns `key` as a string slice.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Returns `key` as a boolean. The strings "true" and "false" are accepted.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.to_lowercase().parse().ok(),
            _ => None,
        }
    }

    /// Returns `key` as a signed integer.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    /// Returns `key` as a float.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    /// Returns `key` as a list of strings, skipping non-string entries.
    #[must_use]
    pub fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        self.values.get(key).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
    }

    /// The node's type key.
    #[must_use]
    pub fn class_key(&self) -> Option<&str> {
        self.get_str(CLASS_KEY)
    }

    /// The node's type-source hint.
    #[must_use]
    pub fn class_prefix(&self) -> Option<&str> {
        self.get_str(CLASS_PREFIX_KEY)
    }

    /// The declared destinations, in order. Empty when none are declared.
    #[must_use]
    pub fn destinations(&self) -> Vec<String> {
        self.get_string_list(DESTINATIONS_KEY).unwrap_or_default()
    }

    /// Returns true if the declaration has a `destinations` key.
    #[must_use]
    pub fn has_destinations_key(&self) -> bool {
        self.contains_key(DESTINATIONS_KEY)
    }

    /// Returns the keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Sets a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }
}

impl From<Map<String, Value>> for NodeConfig {
    fn from(values: Map<String, Value>) -> Self {
        Self::new(values)
    }
}
