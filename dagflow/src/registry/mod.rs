//! Node type registry and external catalogs.

mod catalog;
mod node_registry;

pub use catalog::{NodeCatalog, StaticCatalog};
pub use node_registry::{NodeConstructor, NodeRegistry};

use crate::nodes::{ClientNotification, Node, NodeInit};
use crate::notify::NotifierRegistry;
use crate::traversal::TraverserRegistry;
use std::sync::Arc;

/// Environment variable naming the default external catalog.
pub const EXT_NODE_PACKAGE_ENV: &str = "DAGFLOW_EXT_NODE_PACKAGE";

/// The registries a configuration is loaded and run against.
#[derive(Debug)]
pub struct Registries {
    /// Node types.
    pub nodes: NodeRegistry,
    /// Traversal strategies.
    pub traversers: TraverserRegistry,
    /// Notification clients.
    pub notifiers: Arc<NotifierRegistry>,
}

impl Registries {
    /// Creates registries holding only the built-in types.
    #[must_use]
    pub fn with_builtins() -> Self {
        let notifiers = Arc::new(NotifierRegistry::with_builtins());
        let nodes = NodeRegistry::with_builtins();

        let shared = Arc::clone(&notifiers);
        nodes.insert(
            ClientNotification::TYPE_KEY,
            Arc::new(move |init: NodeInit| {
                Ok(Box::new(ClientNotification::new(init, Arc::clone(&shared))) as Box<dyn Node>)
            }),
        );

        Self {
            nodes,
            traversers: TraverserRegistry::with_builtins(),
            notifiers,
        }
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::with_builtins()
    }
}
