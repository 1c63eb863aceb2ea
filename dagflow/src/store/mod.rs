//! The shared data store threaded through a run.
//!
//! Values are keyed by producer instance name and then by sub-key. Lookups
//! relative to a node follow the configuration DAG's edges.

mod checkpoint;

pub use checkpoint::{CheckpointEnvelope, CHECKPOINT_FORMAT_VERSION};

use crate::errors::{DagflowError, DataStoreError};
use crate::graph::ConfigurationDag;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sub-key used when a producer does not name one.
pub const DEFAULT_KEY: &str = "data";

/// Values recorded by one producer, by sub-key.
pub type KeyMap = BTreeMap<String, Value>;

/// Values recorded by several producers.
pub type ProducerMap = BTreeMap<String, KeyMap>;

/// Requested shape of a lookup result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseShape {
    /// `{producer: {key: value}}`.
    ProducerMap,
    /// `{key: value}`.
    #[default]
    KeyMap,
    /// The bare value when the producer recorded exactly one sub-key.
    Value,
}

/// Result of a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreResponse {
    /// Values grouped by producer.
    ProducerMap(ProducerMap),
    /// One producer's values.
    KeyMap(KeyMap),
    /// A single value.
    Value(Value),
}

impl StoreResponse {
    /// Returns the bare value, if this is one.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the key map, if this is one.
    #[must_use]
    pub fn into_key_map(self) -> Option<KeyMap> {
        match self {
            Self::KeyMap(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the producer map, if this is one.
    #[must_use]
    pub fn into_producer_map(self) -> Option<ProducerMap> {
        match self {
            Self::ProducerMap(m) => Some(m),
            _ => None,
        }
    }
}

/// Upstream key maps holding a given sub-key.
#[derive(Debug, Clone, PartialEq)]
pub enum FilteredUpstream {
    /// No upstream producer recorded the sub-key.
    None,
    /// Exactly one did.
    Single(KeyMap),
    /// Several did, in producer-name order.
    Multiple(Vec<KeyMap>),
}

/// Dependency-scoped store of node outputs.
#[derive(Debug, Clone)]
pub struct DataStore {
    data: ProducerMap,
    dag: Arc<ConfigurationDag>,
}

impl DataStore {
    /// Creates an empty store over `dag`.
    #[must_use]
    pub fn new(dag: Arc<ConfigurationDag>) -> Self {
        Self {
            data: ProducerMap::new(),
            dag,
        }
    }

    pub(crate) fn from_entries(entries: ProducerMap, dag: Arc<ConfigurationDag>) -> Self {
        Self { data: entries, dag }
    }

    /// The graph lookups are resolved against.
    #[must_use]
    pub fn dag(&self) -> &Arc<ConfigurationDag> {
        &self.dag
    }

    /// Records `value` under the default sub-key.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if the producer already recorded it.
    pub fn add(&mut self, producer: &str, value: Value) -> Result<(), DataStoreError> {
        self.insert(producer, DEFAULT_KEY, value, false)
    }

    /// Records `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if the sub-key exists and `overwrite` is false.
    pub fn insert(
        &mut self,
        producer: &str,
        key: &str,
        value: Value,
        overwrite: bool,
    ) -> Result<(), DataStoreError> {
        let entry = self.data.entry(producer.to_string()).or_default();
        if !overwrite && entry.contains_key(key) {
            return Err(DataStoreError::DuplicateKey {
                producer: producer.to_string(),
                key: key.to_string(),
            });
        }
        entry.insert(key.to_string(), value);
        Ok(())
    }

    /// Looks up everything `producer` recorded.
    ///
    /// With `pop`, the producer's entries are removed. A `Value` request on a
    /// producer with several sub-keys returns the key map instead.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProducer` if nothing was recorded for it.
    pub fn get(
        &mut self,
        producer: &str,
        pop: bool,
        shape: ResponseShape,
    ) -> Result<StoreResponse, DataStoreError> {
        let entries = if pop {
            self.data.remove(producer)
        } else {
            self.data.get(producer).cloned()
        }
        .ok_or_else(|| DataStoreError::UnknownProducer {
            producer: producer.to_string(),
        })?;

        Ok(match shape {
            ResponseShape::ProducerMap => {
                StoreResponse::ProducerMap(ProducerMap::from([(producer.to_string(), entries)]))
            }
            ResponseShape::KeyMap => StoreResponse::KeyMap(entries),
            ResponseShape::Value => {
                if entries.len() == 1 {
                    match entries.into_iter().next() {
                        Some((_, value)) => StoreResponse::Value(value),
                        None => StoreResponse::KeyMap(KeyMap::new()),
                    }
                } else {
                    tracing::warn!(
                        producer = %producer,
                        keys = ?entries.keys().collect::<Vec<_>>(),
                        "Multiple keys found; returning key map"
                    );
                    StoreResponse::KeyMap(entries)
                }
            }
        })
    }

    /// Direct upstream producers of `instance`, optionally from one section.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if `instance` is not in the graph.
    pub fn upstream_keys(&self, instance: &str, section: Option<&str>) -> Result<Vec<String>, DagflowError> {
        let predecessors = self.dag.predecessors(instance)?;
        let Some(section) = section else {
            return Ok(predecessors);
        };
        let mut keys = Vec::new();
        for name in predecessors {
            if self.dag.section_of(&name)? == section {
                keys.push(name);
            }
        }
        Ok(keys)
    }

    /// Data recorded by `instance`'s direct upstream producers.
    ///
    /// Only producers that actually recorded something are considered. When
    /// more than one did, a producer map is returned whatever `shape` asks for.
    ///
    /// # Errors
    ///
    /// Returns `NoUpstreamData` if no upstream producer recorded anything.
    pub fn get_upstream_data(
        &mut self,
        instance: &str,
        pop: bool,
        shape: ResponseShape,
        section: Option<&str>,
    ) -> Result<StoreResponse, DagflowError> {
        let with_data: Vec<String> = self
            .upstream_keys(instance, section)?
            .into_iter()
            .filter(|k| self.data.contains_key(k))
            .collect();

        match with_data.as_slice() {
            [] => Err(DataStoreError::NoUpstreamData {
                instance: instance.to_string(),
            }
            .into()),
            [only] => Ok(self.get(only, pop, shape)?),
            _ => {
                let mut merged = ProducerMap::new();
                for producer in &with_data {
                    if let StoreResponse::KeyMap(entries) = self.get(producer, pop, ResponseShape::KeyMap)? {
                        merged.insert(producer.clone(), entries);
                    }
                }
                Ok(StoreResponse::ProducerMap(merged))
            }
        }
    }

    /// Upstream key maps that contain `key`.
    ///
    /// # Errors
    ///
    /// Returns `NoUpstreamData` if no upstream producer recorded anything.
    pub fn get_filtered_upstream_data(&mut self, instance: &str, key: &str) -> Result<FilteredUpstream, DagflowError> {
        let response = self.get_upstream_data(instance, false, ResponseShape::ProducerMap, None)?;
        let mut matches: Vec<KeyMap> = match response {
            StoreResponse::ProducerMap(map) => map.into_values().filter(|m| m.contains_key(key)).collect(),
            StoreResponse::KeyMap(map) if map.contains_key(key) => vec![map],
            _ => Vec::new(),
        };

        Ok(match matches.len() {
            0 => FilteredUpstream::None,
            1 => FilteredUpstream::Single(matches.remove(0)),
            _ => FilteredUpstream::Multiple(matches),
        })
    }

    /// Producers with recorded data, sorted.
    #[must_use]
    pub fn producers(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    /// Returns true if `producer` recorded anything.
    #[must_use]
    pub fn contains(&self, producer: &str) -> bool {
        self.data.contains_key(producer)
    }

    /// Number of producers with recorded data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Removes and returns everything `producer` recorded.
    pub fn remove(&mut self, producer: &str) -> Option<KeyMap> {
        self.data.remove(producer)
    }

    /// All recorded entries.
    #[must_use]
    pub fn entries(&self) -> &ProducerMap {
        &self.data
    }
}
