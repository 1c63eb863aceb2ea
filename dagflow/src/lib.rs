//! # Dagflow
//!
//! A configuration-driven execution engine for directed acyclic graphs of
//! pluggable nodes.
//!
//! Dagflow provides:
//!
//! - **Validated configurations**: JSON or YAML documents with file includes,
//!   strict duplicate-key checks and per-node required-key validation
//! - **Graph checks**: cycle and connectivity checks plus ancestor, descendant
//!   and path queries
//! - **Pluggable traversal**: depth-first, section-layered or explicit orderings
//! - **Conditional pruning**: nodes can switch off their downstream subgraphs
//! - **A shared data store**: dependency-scoped lookups and checkpointing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dagflow::prelude::*;
//! use std::sync::Arc;
//!
//! let registries = Arc::new(Registries::with_builtins());
//! let config = Arc::new(Configuration::load("dag.json", &registries)?);
//!
//! let mut runner = DagRunner::new(config, registries)?;
//! let report = runner.run(RunOptions::default())?;
//! println!("{}", report.summary());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod errors;
pub mod graph;
pub mod nodes;
pub mod notify;
pub mod observability;
pub mod registry;
pub mod runner;
pub mod store;
pub mod testing;
pub mod traversal;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Configuration, Metadata, NodeConfig, NodeDeclaration, SectionSource};
    pub use crate::errors::{
        ConfigurationError, DagflowError, DataStoreError, ExecutionError, GraphError,
        RegistryError, SequenceError,
    };
    pub use crate::graph::ConfigurationDag;
    pub use crate::nodes::{ConditionalPath, Node, NodeInit, NodeOutcome};
    pub use crate::notify::{Notifier, NotifierRegistry};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::registry::{NodeCatalog, NodeRegistry, Registries, StaticCatalog};
    pub use crate::runner::{DagRunner, RunOptions, RunReport, RunState};
    pub use crate::store::{DataStore, FilteredUpstream, ResponseShape, StoreResponse, DEFAULT_KEY};
    pub use crate::traversal::{Traverser, TraverserRegistry};
}
