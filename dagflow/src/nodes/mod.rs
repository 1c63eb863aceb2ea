//! The node contract and the built-in node types.
//!
//! A node is constructed from a [`NodeInit`] by a registered constructor,
//! declares the configuration keys it needs, and runs against the shared
//! [`DataStore`]. Nodes that can switch off parts of the graph at run time
//! expose the [`ConditionalPath`] capability.

mod builtin;

pub use builtin::{ClientNotification, DoNothingNode, LoggingSuccess, SimpleSwitch};

use crate::config::NodeConfig;
use crate::store::DataStore;
use std::collections::BTreeSet;
use std::fmt;

/// What the runner should do after a node finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeOutcome {
    /// Carry on with the next node.
    #[default]
    Continue,
    /// Stop the run cleanly after this node.
    Terminate,
}

impl NodeOutcome {
    /// Returns true if the run should stop.
    #[must_use]
    pub const fn is_terminate(self) -> bool {
        matches!(self, Self::Terminate)
    }
}

/// Everything a constructor receives to build a node instance.
#[derive(Debug, Clone)]
pub struct NodeInit {
    /// Unique instance name.
    pub instance_name: String,
    /// Section the node was declared in.
    pub section: String,
    /// The node's declaration.
    pub config: NodeConfig,
}

impl NodeInit {
    /// Creates a new init bundle.
    #[must_use]
    pub fn new(instance_name: impl Into<String>, section: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            instance_name: instance_name.into(),
            section: section.into(),
            config,
        }
    }
}

/// A unit of work in the DAG.
pub trait Node: fmt::Debug + Send {
    /// The instance name this node was built for.
    fn instance_name(&self) -> &str;

    /// Keys that must be present in the node's declaration.
    ///
    /// Checked for every node before anything runs.
    fn necessary_config(&self, config: &NodeConfig) -> BTreeSet<String>;

    /// Executes the node.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the run.
    fn run(&mut self, store: &mut DataStore) -> anyhow::Result<NodeOutcome>;

    /// Returns the conditional-path capability, if the node has one.
    fn as_conditional(&self) -> Option<&dyn ConditionalPath> {
        None
    }
}

/// Capability of nodes that choose which destinations to follow.
pub trait ConditionalPath {
    /// Destinations to switch off, or `None` to follow all of them.
    ///
    /// Each returned destination is pruned together with everything
    /// downstream of it.
    fn destinations_to_prune(&self) -> Option<Vec<String>>;
}

/// Builds a required-key set from string literals.
#[must_use]
pub fn required_keys(keys: &[&str]) -> BTreeSet<String> {
    keys.iter().map(|k| (*k).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_default_continues() {
        assert_eq!(NodeOutcome::default(), NodeOutcome::Continue);
        assert!(NodeOutcome::Terminate.is_terminate());
        assert!(!NodeOutcome::Continue.is_terminate());
    }

    #[test]
    fn test_required_keys() {
        let keys = required_keys(&["msg", "level", "msg"]);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("level"));
    }
}
