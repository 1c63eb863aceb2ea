//! Registry mapping type keys to node constructors.

use super::NodeCatalog;
use crate::config::NodeConfig;
use crate::errors::{ConfigurationError, RegistryError};
use crate::nodes::{DoNothingNode, LoggingSuccess, Node, NodeInit, SimpleSwitch};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a node instance.
pub type NodeConstructor = Arc<dyn Fn(NodeInit) -> anyhow::Result<Box<dyn Node>> + Send + Sync>;

/// Registry of node types.
#[derive(Default)]
pub struct NodeRegistry {
    constructors: RwLock<HashMap<String, NodeConstructor>>,
    catalogs: RwLock<Vec<Arc<dyn NodeCatalog>>>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.registered_keys())
            .field("catalogs", &self.catalog_names())
            .finish()
    }
}

impl NodeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in node types that need no
    /// shared services.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.insert(
            DoNothingNode::TYPE_KEY,
            Arc::new(|init: NodeInit| Ok(Box::new(DoNothingNode::new(init)) as Box<dyn Node>)),
        );
        registry.insert(
            LoggingSuccess::TYPE_KEY,
            Arc::new(|init: NodeInit| Ok(Box::new(LoggingSuccess::new(init)) as Box<dyn Node>)),
        );
        registry.insert(
            SimpleSwitch::TYPE_KEY,
            Arc::new(|init: NodeInit| Ok(Box::new(SimpleSwitch::new(init)) as Box<dyn Node>)),
        );
        registry
    }

    pub(crate) fn insert(&self, key: &str, constructor: NodeConstructor) {
        self.constructors.write().insert(key.to_string(), constructor);
    }

    /// Registers a node type.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRegistration` if the key exists and
    /// `allow_overwrite` is false.
    pub fn register(
        &self,
        key: impl Into<String>,
        constructor: NodeConstructor,
        allow_overwrite: bool,
    ) -> Result<(), RegistryError> {
        let key = key.into();
        let mut constructors = self.constructors.write();
        if constructors.contains_key(&key) {
            if !allow_overwrite {
                return Err(RegistryError::DuplicateRegistration { key });
            }
            tracing::warn!(type_key = %key, "Overwriting registered node type");
        }
        tracing::debug!(type_key = %key, "Registering node type");
        constructors.insert(key, constructor);
        Ok(())
    }

    /// Removes a node type.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` if the key is absent.
    pub fn unregister(&self, key: &str) -> Result<(), RegistryError> {
        self.constructors
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotRegistered {
                key: key.to_string(),
            })
    }

    /// Returns true if `key` is registered.
    #[must_use]
    pub fn is_registered(&self, key: &str) -> bool {
        self.constructors.read().contains_key(key)
    }

    /// Registered type keys, sorted.
    #[must_use]
    pub fn registered_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.constructors.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Builds a node of type `key`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if the key is not registered and `Construction`
    /// if the constructor fails.
    pub fn instantiate(&self, key: &str, init: NodeInit) -> Result<Box<dyn Node>, RegistryError> {
        let constructor = self
            .constructors
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::unknown_type(key))?;

        let instance = init.instance_name.clone();
        constructor(init).map_err(|e| RegistryError::Construction {
            key: key.to_string(),
            instance,
            message: e.to_string(),
        })
    }

    /// Checks that `config` holds every key `node` requires.
    ///
    /// # Errors
    ///
    /// Returns `MissingRequiredKeys` naming the absent keys.
    pub fn validate_config(
        &self,
        node: &dyn Node,
        type_key: &str,
        config: &NodeConfig,
    ) -> Result<(), ConfigurationError> {
        let missing: Vec<String> = node
            .necessary_config(config)
            .into_iter()
            .filter(|key| !config.contains_key(key))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::MissingRequiredKeys {
                node: node.instance_name().to_string(),
                type_key: type_key.to_string(),
                missing,
            })
        }
    }

    /// Attaches an external catalog.
    pub fn add_catalog(&self, catalog: Arc<dyn NodeCatalog>) {
        tracing::debug!(catalog = %catalog.name(), "Adding node catalog");
        self.catalogs.write().push(catalog);
    }

    /// Names of the attached catalogs, in the order they were added.
    #[must_use]
    pub fn catalog_names(&self) -> Vec<String> {
        self.catalogs
            .read()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Registers `key` from a catalog if it is not already registered.
    ///
    /// With `source`, only the catalog of that name is searched; otherwise all
    /// catalogs are searched in order. Returns `Ok(true)` when a type was
    /// registered and `Ok(false)` when it was already known.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if no searched catalog provides the key.
    pub fn discover(&self, source: Option<&str>, key: &str) -> Result<bool, RegistryError> {
        if self.is_registered(key) {
            return Ok(false);
        }

        let found = self
            .catalogs
            .read()
            .iter()
            .filter(|c| source.map_or(true, |s| c.name() == s))
            .find_map(|c| c.lookup(key));

        let constructor = found.ok_or_else(|| RegistryError::unknown_type(key))?;

        let mut constructors = self.constructors.write();
        if constructors.contains_key(key) {
            return Ok(false);
        }
        tracing::info!(type_key = %key, source = ?source, "Discovered node type");
        constructors.insert(key.to_string(), constructor);
        Ok(true)
    }
}
