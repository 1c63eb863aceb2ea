//! Node types available in every registry.

use super::{required_keys, ConditionalPath, Node, NodeInit, NodeOutcome};
use crate::config::NodeConfig;
use crate::notify::NotifierRegistry;
use crate::store::DataStore;
use anyhow::{anyhow, bail};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Does nothing. Used to join otherwise independent chains into one graph.
#[derive(Debug, Clone)]
pub struct DoNothingNode {
    instance_name: String,
}

impl DoNothingNode {
    /// Registry key.
    pub const TYPE_KEY: &'static str = "DoNothingNode";

    /// Creates the node.
    #[must_use]
    pub fn new(init: NodeInit) -> Self {
        Self {
            instance_name: init.instance_name,
        }
    }
}

impl Node for DoNothingNode {
    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn necessary_config(&self, _config: &NodeConfig) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn run(&mut self, _store: &mut DataStore) -> anyhow::Result<NodeOutcome> {
        Ok(NodeOutcome::Continue)
    }
}

/// Logs `msg` at `level` to signal that the run got this far.
#[derive(Debug, Clone)]
pub struct LoggingSuccess {
    instance_name: String,
    config: NodeConfig,
}

impl LoggingSuccess {
    /// Registry key.
    pub const TYPE_KEY: &'static str = "LoggingSuccess";

    /// Creates the node.
    #[must_use]
    pub fn new(init: NodeInit) -> Self {
        Self {
            instance_name: init.instance_name,
            config: init.config,
        }
    }
}

impl Node for LoggingSuccess {
    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn necessary_config(&self, _config: &NodeConfig) -> BTreeSet<String> {
        required_keys(&["msg", "level"])
    }

    fn run(&mut self, _store: &mut DataStore) -> anyhow::Result<NodeOutcome> {
        let msg = match self.config.get("msg") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => bail!("missing msg"),
        };
        let level = self
            .config
            .get_str("level")
            .ok_or_else(|| anyhow!("level must be a string"))?
            .to_uppercase();

        match level.as_str() {
            "DEBUG" => tracing::debug!(node = %self.instance_name, "{msg}"),
            "INFO" => tracing::info!(node = %self.instance_name, "{msg}"),
            "WARN" | "WARNING" => tracing::warn!(node = %self.instance_name, "{msg}"),
            "ERROR" | "CRITICAL" | "FATAL" => tracing::error!(node = %self.instance_name, "{msg}"),
            other => bail!("unrecognized log level '{other}'"),
        }
        Ok(NodeOutcome::Continue)
    }
}

/// Follows one destination and prunes the others.
#[derive(Debug, Clone)]
pub struct SimpleSwitch {
    instance_name: String,
    config: NodeConfig,
}

impl SimpleSwitch {
    /// Registry key.
    pub const TYPE_KEY: &'static str = "SimpleSwitch";

    /// Creates the node.
    #[must_use]
    pub fn new(init: NodeInit) -> Self {
        Self {
            instance_name: init.instance_name,
            config: init.config,
        }
    }

    fn path_to_travel(&self) -> Option<&str> {
        self.config.get_str("path_to_travel")
    }
}

impl Node for SimpleSwitch {
    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn necessary_config(&self, _config: &NodeConfig) -> BTreeSet<String> {
        required_keys(&["path_to_travel"])
    }

    fn run(&mut self, _store: &mut DataStore) -> anyhow::Result<NodeOutcome> {
        let path = self
            .path_to_travel()
            .ok_or_else(|| anyhow!("path_to_travel must be a string"))?;
        if !self.config.destinations().iter().any(|d| d == path) {
            bail!("path_to_travel '{path}' is not one of the destinations");
        }
        tracing::debug!(node = %self.instance_name, path = %path, "Switching");
        Ok(NodeOutcome::Continue)
    }

    fn as_conditional(&self) -> Option<&dyn ConditionalPath> {
        Some(self)
    }
}

impl ConditionalPath for SimpleSwitch {
    fn destinations_to_prune(&self) -> Option<Vec<String>> {
        let keep = self.path_to_travel()?;
        let pruned: Vec<String> = self
            .config
            .destinations()
            .into_iter()
            .filter(|d| d != keep)
            .collect();
        (!pruned.is_empty()).then_some(pruned)
    }
}

/// Posts a message through a notification client when reached.
#[derive(Debug)]
pub struct ClientNotification {
    instance_name: String,
    config: NodeConfig,
    notifiers: Arc<NotifierRegistry>,
}

impl ClientNotification {
    /// Registry key.
    pub const TYPE_KEY: &'static str = "ClientNotification";

    /// Message sent when none is configured.
    pub const DEFAULT_MESSAGE: &'static str = "SUCCESS! DAG Completed";

    /// Creates the node. The client is resolved when the node runs.
    #[must_use]
    pub fn new(init: NodeInit, notifiers: Arc<NotifierRegistry>) -> Self {
        Self {
            instance_name: init.instance_name,
            config: init.config,
            notifiers,
        }
    }

    /// The message this node will post.
    #[must_use]
    pub fn message(&self) -> &str {
        self.config.get_str("message").unwrap_or(Self::DEFAULT_MESSAGE)
    }
}

impl Node for ClientNotification {
    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn necessary_config(&self, _config: &NodeConfig) -> BTreeSet<String> {
        required_keys(&["client"])
    }

    fn run(&mut self, _store: &mut DataStore) -> anyhow::Result<NodeOutcome> {
        let client = self
            .config
            .get_str("client")
            .ok_or_else(|| anyhow!("client must be a string"))?;
        let notifier = self.notifiers.build(client, self.config.as_map())?;
        notifier.post_message(self.message())?;
        Ok(NodeOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ConfigurationDag;
    use serde_json::json;

    fn init(name: &str, config: serde_json::Value) -> NodeInit {
        NodeInit::new(name, "cleanup_config", NodeConfig::from_value(&config).unwrap())
    }

    fn store() -> DataStore {
        DataStore::new(Arc::new(ConfigurationDag::new()))
    }

    #[test]
    fn test_do_nothing() {
        let mut node = DoNothingNode::new(init("noop", json!({"class": "DoNothingNode"})));
        assert!(node.necessary_config(&NodeConfig::default()).is_empty());
        assert_eq!(node.run(&mut store()).unwrap(), NodeOutcome::Continue);
        assert!(node.as_conditional().is_none());
    }

    #[test]
    fn test_logging_success_levels() {
        let mut node = LoggingSuccess::new(init(
            "done",
            json!({"class": "LoggingSuccess", "msg": "all good", "level": "info"}),
        ));
        assert_eq!(node.run(&mut store()).unwrap(), NodeOutcome::Continue);

        let mut bad = LoggingSuccess::new(init(
            "done",
            json!({"class": "LoggingSuccess", "msg": "all good", "level": "LOUD"}),
        ));
        let err = bad.run(&mut store()).unwrap_err();
        assert!(err.to_string().contains("LOUD"));
    }

    #[test]
    fn test_switch_prunes_other_destinations() {
        let node = SimpleSwitch::new(init(
            "switch",
            json!({"class": "SimpleSwitch", "path_to_travel": "left", "destinations": ["left", "right", "middle"]}),
        ));
        let pruned = node.as_conditional().unwrap().destinations_to_prune();
        assert_eq!(pruned, Some(vec!["right".to_string(), "middle".to_string()]));
    }

    #[test]
    fn test_switch_single_destination_prunes_nothing() {
        let node = SimpleSwitch::new(init(
            "switch",
            json!({"class": "SimpleSwitch", "path_to_travel": "left", "destinations": ["left"]}),
        ));
        assert_eq!(node.destinations_to_prune(), None);
    }

    #[test]
    fn test_switch_rejects_unknown_path() {
        let mut node = SimpleSwitch::new(init(
            "switch",
            json!({"class": "SimpleSwitch", "path_to_travel": "nowhere", "destinations": ["left"]}),
        ));
        assert!(node.run(&mut store()).is_err());
    }

    #[test]
    fn test_client_notification_default_message() {
        let node = ClientNotification::new(
            init("notify", json!({"class": "ClientNotification", "client": "LoggingClient"})),
            Arc::new(NotifierRegistry::with_builtins()),
        );
        assert_eq!(node.message(), ClientNotification::DEFAULT_MESSAGE);
    }

    #[test]
    fn test_client_notification_posts() {
        let mut node = ClientNotification::new(
            init(
                "notify",
                json!({"class": "ClientNotification", "client": "LoggingClient", "message": "done"}),
            ),
            Arc::new(NotifierRegistry::with_builtins()),
        );
        assert_eq!(node.run(&mut store()).unwrap(), NodeOutcome::Continue);
    }

    #[test]
    fn test_client_notification_unknown_client() {
        let mut node = ClientNotification::new(
            init("notify", json!({"class": "ClientNotification", "client": "Carrier Pigeon"})),
            Arc::new(NotifierRegistry::with_builtins()),
        );
        assert!(node.run(&mut store()).is_err());
    }
}
