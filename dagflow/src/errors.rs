//! Error types for the dagflow engine.
//!
//! Errors are grouped by the phase that detects them: configuration loading,
//! graph construction, node registration, sequencing, the shared data store,
//! and node execution. Everything except execution errors is detected before
//! any node runs.

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for dagflow operations.
#[derive(Debug, Error)]
pub enum DagflowError {
    /// The configuration document is invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// The node graph is invalid.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// A node or traverser type could not be registered or resolved.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// A candidate execution sequence was rejected.
    #[error("{0}")]
    Sequence(#[from] SequenceError),

    /// A data store operation failed.
    #[error("{0}")]
    DataStore(#[from] DataStoreError),

    /// A node failed while the run was executing.
    #[error("{0}")]
    Execution(#[from] ExecutionError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DagflowError {
    /// Returns a stable, machine-readable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(e) => e.code(),
            Self::Graph(e) => e.code(),
            Self::Registry(e) => e.code(),
            Self::Sequence(e) => e.code(),
            Self::DataStore(e) => e.code(),
            Self::Execution(e) => e.code(),
            Self::Io(_) => "IO",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }

    /// Returns true if the error was raised before any node executed.
    #[must_use]
    pub fn is_pre_execution(&self) -> bool {
        !matches!(self, Self::Execution(_) | Self::DataStore(_))
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

impl From<serde_json::Error> for DagflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors in the structure or content of a configuration document.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// The configuration file does not exist.
    #[error("config file at: {} not found", path.display())]
    FileNotFound {
        /// The path that was requested.
        path: PathBuf,
    },

    /// The configuration file has an extension that is not accepted.
    #[error("config file at: {} has improper extension type '{extension}' - please use a .json, .yaml or .yml file", path.display())]
    UnsupportedExtension {
        /// The offending path.
        path: PathBuf,
        /// The extension found.
        extension: String,
    },

    /// An included fragment could not be found.
    #[error("Substitution files do not exist: {path}")]
    SubstitutionFileMissing {
        /// The include path as written in the document.
        path: String,
    },

    /// Includes were nested too deeply (most likely a self-include).
    #[error("Include nesting exceeded depth {depth}")]
    IncludeDepthExceeded {
        /// The maximum depth.
        depth: usize,
    },

    /// The document could not be parsed.
    #[error("Unable to parse configuration: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },

    /// A key appears twice within the same mapping.
    #[error("duplicate key: '{key}'")]
    DuplicateKey {
        /// The duplicated key.
        key: String,
    },

    /// A value that must be a mapping is something else.
    #[error("Expected a mapping at '{path}'")]
    NotAMapping {
        /// Dotted path to the value.
        path: String,
    },

    /// The document contains an unknown top-level key.
    #[error("Unsupported top-level key: {key}. Supported keys are [\"metadata\", \"implementation_config\"]")]
    UnsupportedTopLevelKey {
        /// The unexpected key.
        key: String,
    },

    /// The document has no implementation block.
    #[error("Did not find required top-level key implementation_config")]
    MissingImplementation,

    /// A section is not one of the supported section names.
    #[error("Unsupported section: {section}")]
    UnsupportedSection {
        /// The section name.
        section: String,
    },

    /// `metadata.section_registry` and the implementation sections disagree.
    #[error("section_registry mismatch: missing from implementation {missing_in_implementation:?}, missing from metadata {missing_in_metadata:?}")]
    SectionRegistryMismatch {
        /// Sections listed in metadata but absent from the implementation.
        missing_in_implementation: Vec<String>,
        /// Sections present in the implementation but not listed in metadata.
        missing_in_metadata: Vec<String>,
    },

    /// `metadata.section_run` names a section with no declarations.
    #[error("section_run refers to unknown section: {section}")]
    UnknownRunSection {
        /// The section name.
        section: String,
    },

    /// A node declaration has no type key.
    #[error("No class key found in {section}.{node}")]
    MissingClassKey {
        /// The section of the node.
        section: String,
        /// The instance name.
        node: String,
    },

    /// An instance name is declared more than once.
    #[error("Operations must all have unique names in the configuration. Duplicate key: '{name}'")]
    DuplicateInstanceName {
        /// The duplicated instance name.
        name: String,
    },

    /// A node uses a destination key from an older document layout.
    #[error("Node '{node}' uses legacy key '{key}'; nodes declare 'destinations': [] now")]
    LegacyDestinationKey {
        /// The instance name.
        node: String,
        /// The legacy key.
        key: String,
    },

    /// A destination entry is not a string, or `destinations` is not a list.
    #[error("Unrecognized destination in '{node}': {value}")]
    InvalidDestination {
        /// The instance name.
        node: String,
        /// The rejected value.
        value: String,
    },

    /// Metadata values are inconsistent.
    #[error("Invalid metadata: {message}")]
    InvalidMetadata {
        /// Description of the problem.
        message: String,
    },

    /// Metadata names a traverser that is not registered.
    #[error("{name} is not a valid and/or registered traverser")]
    UnknownTraverser {
        /// The traverser name.
        name: String,
    },

    /// A node type could not be resolved while loading.
    #[error("Cannot register node class {type_key}: {reason}")]
    CannotRegister {
        /// The type key.
        type_key: String,
        /// Why resolution failed.
        reason: String,
    },

    /// A node's configuration lacks keys its type requires.
    #[error("Configuration missing necessary keys for '{node}' ({type_key}): missing {missing:?}")]
    MissingRequiredKeys {
        /// The instance name.
        node: String,
        /// The type key.
        type_key: String,
        /// The keys that were not found.
        missing: Vec<String>,
    },

    /// No node is declared with the requested instance name.
    #[error("Unknown key {name}")]
    UnknownInstance {
        /// The requested instance name.
        name: String,
    },
}

impl ConfigurationError {
    /// Returns a stable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileNotFound { .. } => "CONFIG-FILE-NOT-FOUND",
            Self::UnsupportedExtension { .. } => "CONFIG-EXTENSION",
            Self::SubstitutionFileMissing { .. } => "CONFIG-INCLUDE-MISSING",
            Self::IncludeDepthExceeded { .. } => "CONFIG-INCLUDE-DEPTH",
            Self::Parse { .. } => "CONFIG-PARSE",
            Self::DuplicateKey { .. } => "CONFIG-DUPLICATE-KEY",
            Self::NotAMapping { .. } => "CONFIG-NOT-A-MAPPING",
            Self::UnsupportedTopLevelKey { .. } => "CONFIG-TOP-LEVEL-KEY",
            Self::MissingImplementation => "CONFIG-MISSING-IMPLEMENTATION",
            Self::UnsupportedSection { .. } => "CONFIG-UNSUPPORTED-SECTION",
            Self::SectionRegistryMismatch { .. } => "CONFIG-SECTION-REGISTRY",
            Self::UnknownRunSection { .. } => "CONFIG-SECTION-RUN",
            Self::MissingClassKey { .. } => "CONFIG-MISSING-CLASS",
            Self::DuplicateInstanceName { .. } => "CONFIG-DUPLICATE-INSTANCE",
            Self::LegacyDestinationKey { .. } => "CONFIG-LEGACY-DESTINATION",
            Self::InvalidDestination { .. } => "CONFIG-INVALID-DESTINATION",
            Self::InvalidMetadata { .. } => "CONFIG-METADATA",
            Self::UnknownTraverser { .. } => "CONFIG-UNKNOWN-TRAVERSER",
            Self::CannotRegister { .. } => "CONFIG-CANNOT-REGISTER",
            Self::MissingRequiredKeys { .. } => "CONFIG-MISSING-REQUIRED-KEYS",
            Self::UnknownInstance { .. } => "CONFIG-UNKNOWN-INSTANCE",
        }
    }
}

/// Structural problems with the node graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A destination names a node that was never declared.
    #[error("Did not find destination '{destination}' declared by '{node}'")]
    UnknownDestination {
        /// The node declaring the edge.
        node: String,
        /// The undeclared destination.
        destination: String,
    },

    /// The graph contains a directed cycle.
    #[error("Cycle(s) found: {}", cycle.join(" -> "))]
    CycleDetected {
        /// Node names along the cycle, first node repeated at the end.
        cycle: Vec<String>,
    },

    /// The graph splits into more than one connected component.
    #[error("Found multiple connected components: {components:?}")]
    DisconnectedGraph {
        /// The components, each sorted by name.
        components: Vec<Vec<String>>,
    },

    /// A query referenced a node that is not in the graph.
    #[error("Node not found in the DAG: {name}")]
    UnknownNode {
        /// The requested node.
        name: String,
    },

    /// The same node was added twice.
    #[error("Node already present in the DAG: {name}")]
    DuplicateNode {
        /// The duplicated node.
        name: String,
    },
}

impl GraphError {
    /// Returns a stable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownDestination { .. } => "GRAPH-UNKNOWN-DESTINATION",
            Self::CycleDetected { .. } => "GRAPH-CYCLE",
            Self::DisconnectedGraph { .. } => "GRAPH-DISCONNECTED",
            Self::UnknownNode { .. } => "GRAPH-UNKNOWN-NODE",
            Self::DuplicateNode { .. } => "GRAPH-DUPLICATE-NODE",
        }
    }
}

/// Errors raised by the node and traverser registries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The key is already registered and overwriting was not allowed.
    #[error("Already registered with the key {key}")]
    DuplicateRegistration {
        /// The registration key.
        key: String,
    },

    /// Unregistering a key that is not registered.
    #[error("Key not found {key}")]
    NotRegistered {
        /// The registration key.
        key: String,
    },

    /// Instantiating a type that is not registered.
    #[error("{key} is not a registered type")]
    UnknownType {
        /// The type key.
        key: String,
    },

    /// The constructor for a registered type failed.
    #[error("Issue instantiating {instance} of type {key}: {message}")]
    Construction {
        /// The type key.
        key: String,
        /// The instance being built.
        instance: String,
        /// The constructor's error message.
        message: String,
    },
}

impl RegistryError {
    /// Creates an unknown type error.
    #[must_use]
    pub fn unknown_type(key: impl Into<String>) -> Self {
        Self::UnknownType { key: key.into() }
    }

    /// Returns a stable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateRegistration { .. } => "REGISTRY-DUPLICATE",
            Self::NotRegistered { .. } => "REGISTRY-NOT-REGISTERED",
            Self::UnknownType { .. } => "REGISTRY-UNKNOWN-TYPE",
            Self::Construction { .. } => "REGISTRY-CONSTRUCTION",
        }
    }
}

/// Errors raised while validating a candidate execution sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// The sequence names a node more than once.
    #[error("You have duplicate nodes from traverser! {names:?}")]
    DuplicateInSequence {
        /// The duplicated names.
        names: Vec<String>,
    },

    /// The sequence names a node that is not declared.
    #[error("Unknown node in sequence: {name}")]
    UnknownInstance {
        /// The unknown name.
        name: String,
    },

    /// The sequence leaves out nodes of the sections being run.
    #[error("Sequence is missing nodes to run: {names:?}")]
    MissingFromSequence {
        /// The left-out names, sorted.
        names: Vec<String>,
    },

    /// A block of the sequence does not match the membership of its section.
    #[error("Traverser is mismatched with section {section}. Expecting set {expected:?}. Received list {received:?}")]
    SectionMismatch {
        /// The section being filled.
        section: String,
        /// The section's nodes, sorted.
        expected: Vec<String>,
        /// The nodes taken from the sequence, sorted.
        received: Vec<String>,
    },

    /// The sequence ran out before a section could be filled.
    #[error("Ran out of nodes for section {section}: expected {expected}, only received {remaining:?} (missing {})", expected.saturating_sub(remaining.len()))]
    SectionExhausted {
        /// The section being filled.
        section: String,
        /// How many nodes the section holds.
        expected: usize,
        /// What was left of the sequence.
        remaining: Vec<String>,
    },

    /// A node appears after a node it has a path to.
    #[error("Upstream path found, from {from} to {to}")]
    UpstreamOrderViolation {
        /// The later node in the sequence.
        from: String,
        /// The earlier node it reaches.
        to: String,
    },
}

impl SequenceError {
    /// Returns a stable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateInSequence { .. } => "SEQUENCE-DUPLICATE",
            Self::UnknownInstance { .. } => "SEQUENCE-UNKNOWN-INSTANCE",
            Self::MissingFromSequence { .. } => "SEQUENCE-MISSING",
            Self::SectionMismatch { .. } => "SEQUENCE-SECTION-MISMATCH",
            Self::SectionExhausted { .. } => "SEQUENCE-SECTION-EXHAUSTED",
            Self::UpstreamOrderViolation { .. } => "SEQUENCE-UPSTREAM",
        }
    }
}

/// Errors raised by the shared data store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataStoreError {
    /// The producer already wrote this sub-key.
    #[error("Key already exists for {producer}:{key}")]
    DuplicateKey {
        /// The producing node.
        producer: String,
        /// The sub-key.
        key: String,
    },

    /// Nothing has been recorded for the producer.
    #[error("Key not found: {producer}")]
    UnknownProducer {
        /// The requested producer.
        producer: String,
    },

    /// None of the node's upstream producers recorded anything.
    #[error("No upstream keys with data found for {instance}")]
    NoUpstreamData {
        /// The requesting node.
        instance: String,
    },

    /// The checkpoint file was written by an unsupported format version.
    #[error("Unsupported checkpoint format version {found} (expected {expected})")]
    CheckpointVersion {
        /// Version in the file.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },

    /// The checkpoint file could not be read or written.
    #[error("Checkpoint error for {}: {message}", path.display())]
    Checkpoint {
        /// The checkpoint path.
        path: PathBuf,
        /// Underlying error message.
        message: String,
    },
}

impl DataStoreError {
    /// Returns a stable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateKey { .. } => "STORE-DUPLICATE-KEY",
            Self::UnknownProducer { .. } => "STORE-UNKNOWN-PRODUCER",
            Self::NoUpstreamData { .. } => "STORE-NO-UPSTREAM-DATA",
            Self::CheckpointVersion { .. } => "STORE-CHECKPOINT-VERSION",
            Self::Checkpoint { .. } => "STORE-CHECKPOINT",
        }
    }
}

/// Fatal errors raised while nodes execute.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A node could not be instantiated at run time.
    #[error("Issue instantiating {node} and class {type_key}: {message}")]
    InstantiationFailed {
        /// The instance name.
        node: String,
        /// The type key.
        type_key: String,
        /// The registry error message.
        message: String,
    },

    /// A node's run method returned an error.
    #[error("Issue with {node}: {source}")]
    NodeFailed {
        /// The failing node.
        node: String,
        /// The node's error.
        #[source]
        source: anyhow::Error,
    },

    /// A conditional node asked to prune something it does not point to.
    #[error("Destination {destination} is not in destinations list of {node}")]
    PruneTargetNotADestination {
        /// The conditional node.
        node: String,
        /// The requested destination.
        destination: String,
    },

    /// The configured notification client could not be built.
    #[error("Error trying to instantiate notification client {client}: {message}")]
    NotifierUnavailable {
        /// The client name.
        client: String,
        /// Why construction failed.
        message: String,
    },
}

impl ExecutionError {
    /// Returns the node the error is attributed to, if any.
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::InstantiationFailed { node, .. }
            | Self::NodeFailed { node, .. }
            | Self::PruneTargetNotADestination { node, .. } => Some(node),
            Self::NotifierUnavailable { .. } => None,
        }
    }

    /// Returns a stable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InstantiationFailed { .. } => "EXEC-INSTANTIATION",
            Self::NodeFailed { .. } => "EXEC-NODE-FAILED",
            Self::PruneTargetNotADestination { .. } => "EXEC-PRUNE-TARGET",
            Self::NotifierUnavailable { .. } => "EXEC-NOTIFIER",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_detected_display() {
        let err = GraphError::CycleDetected {
            cycle: vec!["a".into(), "b".into(), "c".into(), "a".into()],
        };

        assert!(err.to_string().contains("a -> b -> c -> a"));
        assert_eq!(err.code(), "GRAPH-CYCLE");
    }

    #[test]
    fn test_section_exhausted_names_missing_count() {
        let err = SequenceError::SectionExhausted {
            section: "writer_config".into(),
            expected: 2,
            remaining: vec!["write_a".into()],
        };

        let msg = err.to_string();
        assert!(msg.contains("writer_config"));
        assert!(msg.contains("missing 1"));
    }

    #[test]
    fn test_top_level_error_delegates_code() {
        let err: DagflowError = DataStoreError::DuplicateKey {
            producer: "reader".into(),
            key: "data".into(),
        }
        .into();

        assert_eq!(err.code(), "STORE-DUPLICATE-KEY");
        let dict = err.to_dict();
        assert_eq!(dict.get("code").unwrap(), "STORE-DUPLICATE-KEY");
        assert!(dict
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap()
            .contains("reader:data"));
    }

    #[test]
    fn test_pre_execution_classification() {
        let graph: DagflowError = GraphError::UnknownNode { name: "x".into() }.into();
        assert!(graph.is_pre_execution());

        let exec: DagflowError = ExecutionError::NodeFailed {
            node: "x".into(),
            source: anyhow::anyhow!("boom"),
        }
        .into();
        assert!(!exec.is_pre_execution());
    }

    #[test]
    fn test_execution_error_node() {
        let err = ExecutionError::PruneTargetNotADestination {
            node: "switch".into(),
            destination: "elsewhere".into(),
        };
        assert_eq!(err.node(), Some("switch"));
    }
}
