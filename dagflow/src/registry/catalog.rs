//! External node catalogs.
//!
//! Embedding applications ship their own node types as catalogs. A catalog
//! is consulted only for type keys the registry does not already know.

use super::NodeConstructor;
use std::collections::BTreeMap;

/// A named source of node constructors.
pub trait NodeCatalog: Send + Sync {
    /// The name configurations use to refer to this catalog.
    fn name(&self) -> &str;

    /// Looks up a constructor by type key.
    fn lookup(&self, type_key: &str) -> Option<NodeConstructor>;

    /// All type keys this catalog provides.
    fn type_keys(&self) -> Vec<String>;
}

/// A catalog backed by an in-memory table.
#[derive(Clone)]
pub struct StaticCatalog {
    name: String,
    entries: BTreeMap<String, NodeConstructor>,
}

impl StaticCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Adds a type to the catalog.
    #[must_use]
    pub fn with(mut self, type_key: impl Into<String>, constructor: NodeConstructor) -> Self {
        self.entries.insert(type_key.into(), constructor);
        self
    }
}

impl std::fmt::Debug for StaticCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCatalog")
            .field("name", &self.name)
            .field("types", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NodeCatalog for StaticCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, type_key: &str) -> Option<NodeConstructor> {
        self.entries.get(type_key).cloned()
    }

    fn type_keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}
