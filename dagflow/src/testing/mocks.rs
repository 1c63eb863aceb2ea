//! Mock nodes for testing.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::nodes::{Node, NodeInit, NodeOutcome};
use crate::registry::NodeRegistry;
use crate::store::{DataStore, DEFAULT_KEY};

/// Shared, ordered record of which nodes ran.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instance name.
    pub fn record(&self, name: impl Into<String>) {
        self.entries.lock().push(name.into());
    }

    /// Instance names in execution order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns true if `name` ran.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().iter().any(|n| n == name)
    }

    /// Number of recorded executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing ran.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Clears the log.
    pub fn reset(&self) {
        self.entries.lock().clear();
    }
}

/// Records its execution and continues.
#[derive(Debug)]
pub struct RecordingNode {
    init: NodeInit,
    log: ExecutionLog,
}

impl RecordingNode {
    /// Type key used by [`register_mocks`].
    pub const TYPE_KEY: &'static str = "Recording";

    /// Creates a recording node.
    #[must_use]
    pub fn new(init: NodeInit, log: ExecutionLog) -> Self {
        Self { init, log }
    }
}

impl Node for RecordingNode {
    fn instance_name(&self) -> &str {
        &self.init.instance_name
    }

    fn necessary_config(&self, _config: &crate::config::NodeConfig) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn run(&mut self, _store: &mut DataStore) -> anyhow::Result<NodeOutcome> {
        self.log.record(&self.init.instance_name);
        Ok(NodeOutcome::Continue)
    }
}

/// Records its execution, then fails with the configured `error` message.
#[derive(Debug)]
pub struct FailingNode {
    init: NodeInit,
    log: ExecutionLog,
}

impl FailingNode {
    /// Type key used by [`register_mocks`].
    pub const TYPE_KEY: &'static str = "Failing";

    /// Creates a failing node.
    #[must_use]
    pub fn new(init: NodeInit, log: ExecutionLog) -> Self {
        Self { init, log }
    }
}

impl Node for FailingNode {
    fn instance_name(&self) -> &str {
        &self.init.instance_name
    }

    fn necessary_config(&self, _config: &crate::config::NodeConfig) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn run(&mut self, _store: &mut DataStore) -> anyhow::Result<NodeOutcome> {
        self.log.record(&self.init.instance_name);
        let message = self.init.config.get_str("error").unwrap_or("simulated failure");
        anyhow::bail!("{message}")
    }
}

/// Records its execution and asks the runner to stop.
#[derive(Debug)]
pub struct TerminatingNode {
    init: NodeInit,
    log: ExecutionLog,
}

impl TerminatingNode {
    /// Type key used by [`register_mocks`].
    pub const TYPE_KEY: &'static str = "Terminating";

    /// Creates a terminating node.
    #[must_use]
    pub fn new(init: NodeInit, log: ExecutionLog) -> Self {
        Self { init, log }
    }
}

impl Node for TerminatingNode {
    fn instance_name(&self) -> &str {
        &self.init.instance_name
    }

    fn necessary_config(&self, _config: &crate::config::NodeConfig) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn run(&mut self, _store: &mut DataStore) -> anyhow::Result<NodeOutcome> {
        self.log.record(&self.init.instance_name);
        Ok(NodeOutcome::Terminate)
    }
}

/// Records its execution and writes a value into the store.
///
/// The value comes from the `value` key (default: the instance name) and is
/// stored under the `key` key (default: [`DEFAULT_KEY`]).
#[derive(Debug)]
pub struct ProducerNode {
    init: NodeInit,
    log: ExecutionLog,
}

impl ProducerNode {
    /// Type key used by [`register_mocks`].
    pub const TYPE_KEY: &'static str = "Producer";

    /// Creates a producer node.
    #[must_use]
    pub fn new(init: NodeInit, log: ExecutionLog) -> Self {
        Self { init, log }
    }
}

impl Node for ProducerNode {
    fn instance_name(&self) -> &str {
        &self.init.instance_name
    }

    fn necessary_config(&self, _config: &crate::config::NodeConfig) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn run(&mut self, store: &mut DataStore) -> anyhow::Result<NodeOutcome> {
        let name = &self.init.instance_name;
        self.log.record(name);
        let value = self
            .init
            .config
            .get("value")
            .cloned()
            .unwrap_or_else(|| Value::String(name.clone()));
        let key = self.init.config.get_str("key").unwrap_or(DEFAULT_KEY);
        store.insert(name, key, value, false)?;
        Ok(NodeOutcome::Continue)
    }
}

/// Registers every mock type, sharing `log`, replacing existing entries.
pub fn register_mocks(registry: &NodeRegistry, log: &ExecutionLog) {
    let shared = log.clone();
    registry.insert(
        RecordingNode::TYPE_KEY,
        Arc::new(move |init: NodeInit| Ok(Box::new(RecordingNode::new(init, shared.clone())) as Box<dyn Node>)),
    );
    let shared = log.clone();
    registry.insert(
        FailingNode::TYPE_KEY,
        Arc::new(move |init: NodeInit| Ok(Box::new(FailingNode::new(init, shared.clone())) as Box<dyn Node>)),
    );
    let shared = log.clone();
    registry.insert(
        TerminatingNode::TYPE_KEY,
        Arc::new(move |init: NodeInit| Ok(Box::new(TerminatingNode::new(init, shared.clone())) as Box<dyn Node>)),
    );
    let shared = log.clone();
    registry.insert(
        ProducerNode::TYPE_KEY,
        Arc::new(move |init: NodeInit| Ok(Box::new(ProducerNode::new(init, shared.clone())) as Box<dyn Node>)),
    );
}
