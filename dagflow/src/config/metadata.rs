//! Typed view of the optional `metadata` block.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Run-level settings declared alongside the node graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Name of the traverser used to order nodes.
    #[serde(default)]
    pub traverser: Option<String>,
    /// Sections the implementation must declare, in run order.
    #[serde(default)]
    pub section_registry: Vec<String>,
    /// Subset of sections to execute, in run order.
    #[serde(default)]
    pub section_run: Vec<String>,
    /// Explicit full node sequence; overrides the traverser.
    #[serde(default)]
    pub node_sequence: Vec<String>,
    /// Checkpoint settings for the data store.
    #[serde(default)]
    pub data_object: Option<DataObjectConfig>,
    /// Notification client used on fatal failures.
    #[serde(default)]
    pub notify_on_error: Option<NotifyConfig>,
    /// Name of an external node catalog to resolve unknown types from.
    #[serde(default)]
    pub class_package: Option<String>,
    /// Keys this engine does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metadata {
    /// Parses metadata from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns the serde error when a known key has the wrong shape.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    /// Returns true if a non-empty `section_run` was given.
    #[must_use]
    pub fn has_section_run(&self) -> bool {
        !self.section_run.is_empty()
    }

    /// Returns true if a non-empty `section_registry` was given.
    #[must_use]
    pub fn has_section_registry(&self) -> bool {
        !self.section_registry.is_empty()
    }

    /// Returns true if a non-empty `node_sequence` was given.
    #[must_use]
    pub fn has_node_sequence(&self) -> bool {
        !self.node_sequence.is_empty()
    }

    /// The checkpoint file to restore from, if restoring is enabled.
    #[must_use]
    pub fn checkpoint_read_path(&self) -> Option<&PathBuf> {
        self.data_object
            .as_ref()
            .filter(|cfg| cfg.read_from_cache)
            .and_then(|cfg| cfg.read_filename.as_ref())
    }

    /// The checkpoint file to write to, if writing is enabled.
    #[must_use]
    pub fn checkpoint_write_path(&self) -> Option<&PathBuf> {
        self.data_object
            .as_ref()
            .filter(|cfg| cfg.write_to_cache)
            .and_then(|cfg| cfg.write_filename.as_ref())
    }
}

/// Checkpoint settings (`metadata.data_object`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObjectConfig {
    /// Restore the data store from `read_filename` before running.
    #[serde(default, deserialize_with = "flag")]
    pub read_from_cache: bool,
    /// Checkpoint to restore from.
    #[serde(default)]
    pub read_filename: Option<PathBuf>,
    /// Persist the data store to `write_filename` after running.
    #[serde(default, deserialize_with = "flag")]
    pub write_to_cache: bool,
    /// Checkpoint to write.
    #[serde(default)]
    pub write_filename: Option<PathBuf>,
}

/// Notification client settings (`metadata.notify_on_error`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Registered client name.
    pub client: String,
    /// Remaining client parameters.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// Accepts `true`/`false` as booleans or case-insensitive strings.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
        Null(()),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.eq_ignore_ascii_case("true"),
        Flag::Null(()) => false,
    })
}
