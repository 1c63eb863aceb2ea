//! Builder for configuration documents used in tests.

use serde_json::{json, Map, Value};

use crate::config::{Configuration, CLASS_KEY, DESTINATIONS_KEY, IMPLEMENTATION_KEY, METADATA_KEY};
use crate::errors::DagflowError;
use crate::registry::Registries;

/// Assembles a configuration document node by node.
///
/// Sections and nodes keep the order they were first added in; re-adding a
/// node replaces its declaration in place.
#[derive(Debug, Clone, Default)]
pub struct ConfigFixture {
    metadata: Map<String, Value>,
    implementation: Map<String, Value>,
}

impl ConfigFixture {
    /// Creates an empty fixture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a node with a type key and destinations.
    #[must_use]
    pub fn node(self, section: &str, name: &str, class: &str, destinations: &[&str]) -> Self {
        self.node_with(section, name, class, destinations, Value::Object(Map::new()))
    }

    /// Declares a node with extra configuration keys merged in.
    #[must_use]
    pub fn node_with(
        mut self,
        section: &str,
        name: &str,
        class: &str,
        destinations: &[&str],
        extra: Value,
    ) -> Self {
        let mut declaration = Map::new();
        declaration.insert(CLASS_KEY.to_string(), json!(class));
        declaration.insert(DESTINATIONS_KEY.to_string(), json!(destinations));
        if let Value::Object(extra) = extra {
            declaration.extend(extra);
        }

        let section_map = self
            .implementation
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(nodes) = section_map {
            nodes.insert(name.to_string(), Value::Object(declaration));
        }
        self
    }

    /// Sets a metadata key.
    #[must_use]
    pub fn metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Sets `metadata.section_run`.
    #[must_use]
    pub fn section_run(self, sections: &[&str]) -> Self {
        self.metadata("section_run", json!(sections))
    }

    /// Sets `metadata.node_sequence`.
    #[must_use]
    pub fn node_sequence(self, names: &[&str]) -> Self {
        self.metadata("node_sequence", json!(names))
    }

    /// Sets `metadata.traverser`.
    #[must_use]
    pub fn traverser(self, name: &str) -> Self {
        self.metadata("traverser", json!(name))
    }

    /// The document; `metadata` is omitted when empty.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        if !self.metadata.is_empty() {
            root.insert(METADATA_KEY.to_string(), Value::Object(self.metadata.clone()));
        }
        root.insert(IMPLEMENTATION_KEY.to_string(), Value::Object(self.implementation.clone()));
        Value::Object(root)
    }

    /// Loads and validates the document.
    ///
    /// # Errors
    ///
    /// Returns whatever validation error the document triggers.
    pub fn build(&self, registries: &Registries) -> Result<Configuration, DagflowError> {
        Configuration::from_value(&self.to_value(), registries)
    }
}
