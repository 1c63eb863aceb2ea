//! Traversal strategies turning the DAG into an execution sequence.

mod strategies;

pub use strategies::{DepthFirstTraverser, ExplicitSequenceTraverser, LayeredTraverser};

use crate::config::Configuration;
use crate::errors::{DagflowError, RegistryError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Produces a linear execution order for a configuration.
pub trait Traverser: Send + Sync {
    /// Registry name of the strategy.
    fn name(&self) -> &str;

    /// The node names in the order they should run.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be ordered.
    fn traversal_list(&self, config: &Configuration) -> Result<Vec<String>, DagflowError>;

    /// Whether the sequence must run one whole section after another.
    ///
    /// When true, a filtered sequence is re-checked block by block against
    /// section membership. When false, it is checked for upstream order.
    fn run_section_by_section(&self) -> bool;
}

/// Builds a traverser.
pub type TraverserConstructor = Arc<dyn Fn() -> Box<dyn Traverser> + Send + Sync>;

/// Registry of traversal strategies by name.
pub struct TraverserRegistry {
    constructors: RwLock<HashMap<String, TraverserConstructor>>,
    default_name: String,
}

impl std::fmt::Debug for TraverserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.constructors.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("TraverserRegistry")
            .field("traversers", &names)
            .field("default", &self.default_name)
            .finish()
    }
}

impl Default for TraverserRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TraverserRegistry {
    /// Creates a registry with the built-in strategies; `layered` is the default.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut constructors: HashMap<String, TraverserConstructor> = HashMap::new();
        constructors.insert(
            LayeredTraverser::NAME.to_string(),
            Arc::new(|| Box::new(LayeredTraverser) as Box<dyn Traverser>),
        );
        constructors.insert(
            DepthFirstTraverser::NAME.to_string(),
            Arc::new(|| Box::new(DepthFirstTraverser) as Box<dyn Traverser>),
        );
        constructors.insert(
            ExplicitSequenceTraverser::NAME.to_string(),
            Arc::new(|| Box::new(ExplicitSequenceTraverser) as Box<dyn Traverser>),
        );
        Self {
            constructors: RwLock::new(constructors),
            default_name: LayeredTraverser::NAME.to_string(),
        }
    }

    /// Registers a strategy.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRegistration` if the name is taken and
    /// `allow_overwrite` is false.
    pub fn register(
        &self,
        name: impl Into<String>,
        constructor: TraverserConstructor,
        allow_overwrite: bool,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut constructors = self.constructors.write();
        if !allow_overwrite && constructors.contains_key(&name) {
            return Err(RegistryError::DuplicateRegistration { key: name });
        }
        tracing::debug!(traverser = %name, "Registering traverser");
        constructors.insert(name, constructor);
        Ok(())
    }

    /// Returns true if a strategy is registered under `name`.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors.read().contains_key(name)
    }

    /// Builds the named strategy.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if the name is not registered.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn Traverser>, RegistryError> {
        let constructor = self
            .constructors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::unknown_type(name))?;
        Ok(constructor())
    }

    /// Builds the default strategy.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if the default was unregistered.
    pub fn default_traverser(&self) -> Result<Box<dyn Traverser>, RegistryError> {
        self.instantiate(&self.default_name)
    }

    /// Picks the strategy a configuration asks for.
    ///
    /// An explicit `node_sequence` wins, then a named `traverser`, then the
    /// default.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if the named strategy is not registered.
    pub fn for_configuration(&self, config: &Configuration) -> Result<Box<dyn Traverser>, RegistryError> {
        let metadata = config.metadata();
        if metadata.has_node_sequence() {
            return self.instantiate(ExplicitSequenceTraverser::NAME);
        }
        match metadata.traverser.as_deref() {
            Some(name) => self.instantiate(name),
            None => self.default_traverser(),
        }
    }
}
