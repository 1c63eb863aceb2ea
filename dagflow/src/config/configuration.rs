//! Loading and validating a configuration document.

use super::document::{content_hash, parse_document, substitute_includes, DocumentFormat};
use super::metadata::Metadata;
use super::node_config::{NodeConfig, DESTINATIONS_KEY, LEGACY_DESTINATION_KEYS};
use super::section::{SectionSource, SectionType, IMPLEMENTATION_KEY, METADATA_KEY};
use crate::errors::{ConfigurationError, DagflowError, RegistryError};
use crate::graph::ConfigurationDag;
use crate::nodes::NodeInit;
use crate::registry::{Registries, EXT_NODE_PACKAGE_ENV};
use crate::traversal::ExplicitSequenceTraverser;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One node as declared in the implementation block.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDeclaration {
    /// Unique instance name.
    pub name: String,
    /// Section the node is declared in.
    pub section: String,
    /// Registry key of the node type.
    pub type_key: String,
    /// Where to look for the type if it is not registered.
    pub type_source: Option<String>,
    /// The full declaration.
    pub config: NodeConfig,
}

impl NodeDeclaration {
    /// The bundle handed to the node constructor.
    #[must_use]
    pub fn node_init(&self) -> NodeInit {
        NodeInit::new(self.name.clone(), self.section.clone(), self.config.clone())
    }

    /// Declared destinations, in order.
    #[must_use]
    pub fn destinations(&self) -> Vec<String> {
        self.config.destinations()
    }
}

/// A validated configuration.
#[derive(Debug, Clone)]
pub struct Configuration {
    source_path: Option<PathBuf>,
    document: Value,
    metadata: Metadata,
    sections: Vec<String>,
    declarations: Vec<NodeDeclaration>,
    by_name: HashMap<String, usize>,
    dag: Arc<ConfigurationDag>,
    config_string: String,
    config_hash: String,
    config_time: String,
}

impl Configuration {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns the first configuration, registry or graph problem found.
    pub fn load(path: impl AsRef<Path>, registries: &Registries) -> Result<Self, DagflowError> {
        let path = path.as_ref();
        let format = DocumentFormat::from_path(path)?;
        if !path.is_file() {
            return Err(ConfigurationError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        tracing::info!(path = %path.display(), "Loading configuration");
        let text = std::fs::read_to_string(path)?;
        let text = substitute_includes(&text, path.parent())?;
        let document = parse_document(&text, format)?;
        Self::from_document(document, Some(path.to_path_buf()), registries)
    }

    /// Validates an in-memory configuration.
    ///
    /// The value still goes through include substitution on its serialized
    /// form.
    ///
    /// # Errors
    ///
    /// Returns the first configuration, registry or graph problem found.
    pub fn from_value(value: &Value, registries: &Registries) -> Result<Self, DagflowError> {
        let text = serde_json::to_string(value)?;
        let text = substitute_includes(&text, None)?;
        let document = parse_document(&text, DocumentFormat::Json)?;
        Self::from_document(document, None, registries)
    }

    fn from_document(
        document: Value,
        source_path: Option<PathBuf>,
        registries: &Registries,
    ) -> Result<Self, DagflowError> {
        let root = document.as_object().ok_or_else(|| ConfigurationError::NotAMapping {
            path: "<root>".to_string(),
        })?;

        for key in root.keys() {
            if key != METADATA_KEY && key != IMPLEMENTATION_KEY {
                return Err(ConfigurationError::UnsupportedTopLevelKey { key: key.clone() }.into());
            }
        }

        let metadata = match root.get(METADATA_KEY) {
            None | Some(Value::Null) => Metadata::default(),
            Some(value @ Value::Object(_)) => {
                Metadata::from_value(value).map_err(|e| ConfigurationError::InvalidMetadata {
                    message: e.to_string(),
                })?
            }
            Some(_) => {
                return Err(ConfigurationError::NotAMapping {
                    path: METADATA_KEY.to_string(),
                }
                .into())
            }
        };

        let implementation = root
            .get(IMPLEMENTATION_KEY)
            .ok_or(ConfigurationError::MissingImplementation)?
            .as_object()
            .ok_or_else(|| ConfigurationError::NotAMapping {
                path: IMPLEMENTATION_KEY.to_string(),
            })?;

        let (config_string, config_hash) = content_hash(&document)?;
        let config_time = chrono::Local::now().format("%Y%m%d_%H%M").to_string();

        let sections: Vec<String> = implementation.keys().cloned().collect();

        check_metadata(&metadata, &sections, registries)?;
        check_sections(&metadata, &sections)?;

        let declarations = collect_declarations(implementation)?;
        tracing::info!("OK: all class keys are present");

        resolve_types(&declarations, &metadata, registries)?;

        let mut conditional = HashSet::new();
        for decl in &declarations {
            let node = registries.nodes.instantiate(&decl.type_key, decl.node_init())?;
            registries
                .nodes
                .validate_config(node.as_ref(), &decl.type_key, &decl.config)?;
            if node.as_conditional().is_some() {
                conditional.insert(decl.name.clone());
            }
        }
        tracing::info!("OK: all classes recognized");
        tracing::info!("OK: good necessary_configs");

        let dag = build_dag(&declarations, &conditional)?;
        dag.check_dag()?;

        let by_name = declarations
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();

        Ok(Self {
            source_path,
            document,
            metadata,
            sections,
            declarations,
            by_name,
            dag: Arc::new(dag),
            config_string,
            config_hash,
            config_time,
        })
    }

    /// The file this configuration was loaded from, if any.
    #[must_use]
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// The full parsed document.
    #[must_use]
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Run metadata.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Implementation sections in document order.
    #[must_use]
    pub fn sections(&self) -> &[String] {
        &self.sections
    }

    /// All node declarations in document order.
    #[must_use]
    pub fn declarations(&self) -> &[NodeDeclaration] {
        &self.declarations
    }

    /// The declaration of one node.
    #[must_use]
    pub fn declaration(&self, name: &str) -> Option<&NodeDeclaration> {
        self.by_name.get(name).map(|&i| &self.declarations[i])
    }

    /// Returns true if a node with this name is declared.
    #[must_use]
    pub fn has_instance(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// The configuration of one node.
    ///
    /// # Errors
    ///
    /// Returns `UnknownInstance` if no node has that name.
    pub fn config_for_instance(&self, name: &str) -> Result<&NodeConfig, ConfigurationError> {
        self.declaration(name)
            .map(|d| &d.config)
            .ok_or_else(|| ConfigurationError::UnknownInstance {
                name: name.to_string(),
            })
    }

    /// Names of the nodes declared in `section`, in document order.
    #[must_use]
    pub fn section_members(&self, section: &str) -> Vec<String> {
        self.declarations
            .iter()
            .filter(|d| d.section == section)
            .map(|d| d.name.clone())
            .collect()
    }

    /// The sections to run, in order, and where that order came from.
    ///
    /// `section_run` takes precedence over `section_registry`, which takes
    /// precedence over the canonical order of the sections present.
    #[must_use]
    pub fn sections_in_order(&self) -> (Vec<String>, SectionSource) {
        if self.metadata.has_section_run() {
            return (self.metadata.section_run.clone(), SectionSource::SectionRun);
        }
        if self.metadata.has_section_registry() {
            return (
                self.metadata.section_registry.clone(),
                SectionSource::SectionRegistry,
            );
        }
        let present: Vec<String> = SectionType::ALL
            .iter()
            .map(SectionType::as_str)
            .filter(|s| self.sections.iter().any(|p| p == s))
            .map(String::from)
            .collect();
        (present, SectionSource::Default)
    }

    /// The validated graph.
    #[must_use]
    pub fn dag(&self) -> &Arc<ConfigurationDag> {
        &self.dag
    }

    /// Canonical JSON text of the document.
    #[must_use]
    pub fn config_string(&self) -> &str {
        &self.config_string
    }

    /// SHA-256 of the canonical document.
    #[must_use]
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Load time, formatted `%Y%m%d_%H%M`.
    #[must_use]
    pub fn config_time(&self) -> &str {
        &self.config_time
    }
}

fn check_metadata(
    metadata: &Metadata,
    sections: &[String],
    registries: &Registries,
) -> Result<(), ConfigurationError> {
    if let Some(name) = &metadata.traverser {
        if !registries.traversers.is_registered(name) {
            return Err(ConfigurationError::UnknownTraverser { name: name.clone() });
        }
        if name == ExplicitSequenceTraverser::NAME && !metadata.has_node_sequence() {
            return Err(ConfigurationError::InvalidMetadata {
                message: format!("metadata.traverser '{name}' requires a non-empty 'node_sequence'"),
            });
        }
    }

    if let Some(data_object) = &metadata.data_object {
        if data_object.read_from_cache {
            let Some(path) = &data_object.read_filename else {
                return Err(ConfigurationError::InvalidMetadata {
                    message: "metadata.data_object: if read_from_cache==true, you must set 'read_filename'"
                        .to_string(),
                });
            };
            if !path.exists() {
                return Err(ConfigurationError::InvalidMetadata {
                    message: format!(
                        "Invalid metadata.data_object.read_filename: {}",
                        path.display()
                    ),
                });
            }
        }
        if data_object.write_to_cache && data_object.write_filename.is_none() {
            return Err(ConfigurationError::InvalidMetadata {
                message: "metadata.data_object: if write_to_cache==true, you must set 'write_filename'"
                    .to_string(),
            });
        }
    }

    for section in &metadata.section_run {
        if !sections.contains(section) {
            return Err(ConfigurationError::UnknownRunSection {
                section: section.clone(),
            });
        }
    }

    Ok(())
}

fn check_sections(metadata: &Metadata, sections: &[String]) -> Result<(), ConfigurationError> {
    if metadata.has_section_registry() {
        let actual: BTreeSet<&String> = sections.iter().collect();
        let declared: BTreeSet<&String> = metadata.section_registry.iter().collect();
        if actual != declared {
            return Err(ConfigurationError::SectionRegistryMismatch {
                missing_in_implementation: declared.difference(&actual).map(|s| (*s).clone()).collect(),
                missing_in_metadata: actual.difference(&declared).map(|s| (*s).clone()).collect(),
            });
        }
        tracing::info!("OK: section_registry sections match implementation sections");
        return Ok(());
    }

    if let Some(section) = sections.iter().find(|s| !SectionType::is_supported(s)) {
        return Err(ConfigurationError::UnsupportedSection {
            section: section.clone(),
        });
    }
    tracing::info!("OK: all sections are supported operations");
    Ok(())
}

fn collect_declarations(
    implementation: &Map<String, Value>,
) -> Result<Vec<NodeDeclaration>, ConfigurationError> {
    let mut declarations = Vec::new();
    let mut seen = HashSet::new();

    for (section, nodes) in implementation {
        let nodes = nodes.as_object().ok_or_else(|| ConfigurationError::NotAMapping {
            path: format!("{IMPLEMENTATION_KEY}.{section}"),
        })?;

        for (name, value) in nodes {
            if !seen.insert(name.clone()) {
                return Err(ConfigurationError::DuplicateInstanceName { name: name.clone() });
            }

            let config = NodeConfig::from_value(value).ok_or_else(|| ConfigurationError::NotAMapping {
                path: format!("{IMPLEMENTATION_KEY}.{section}.{name}"),
            })?;

            let type_key = config
                .class_key()
                .ok_or_else(|| ConfigurationError::MissingClassKey {
                    section: section.clone(),
                    node: name.clone(),
                })?
                .to_string();

            if let Some(key) = LEGACY_DESTINATION_KEYS.iter().find(|k| config.contains_key(k)) {
                return Err(ConfigurationError::LegacyDestinationKey {
                    node: name.clone(),
                    key: (*key).to_string(),
                });
            }

            check_destinations(name, &config)?;

            declarations.push(NodeDeclaration {
                name: name.clone(),
                section: section.clone(),
                type_key,
                type_source: config.class_prefix().map(String::from),
                config,
            });
        }
    }

    Ok(declarations)
}

fn check_destinations(node: &str, config: &NodeConfig) -> Result<(), ConfigurationError> {
    let Some(value) = config.get(DESTINATIONS_KEY) else {
        return Ok(());
    };
    let items = value.as_array().ok_or_else(|| ConfigurationError::InvalidDestination {
        node: node.to_string(),
        value: value.to_string(),
    })?;
    if let Some(bad) = items.iter().find(|v| !v.is_string()) {
        return Err(ConfigurationError::InvalidDestination {
            node: node.to_string(),
            value: bad.to_string(),
        });
    }
    Ok(())
}

fn resolve_types(
    declarations: &[NodeDeclaration],
    metadata: &Metadata,
    registries: &Registries,
) -> Result<(), ConfigurationError> {
    let env_source = std::env::var(EXT_NODE_PACKAGE_ENV).ok();
    let mut resolved = HashSet::new();

    for decl in declarations {
        if registries.nodes.is_registered(&decl.type_key) || !resolved.insert(decl.type_key.clone()) {
            continue;
        }

        let sources: Vec<&str> = [
            decl.type_source.as_deref(),
            env_source.as_deref(),
            metadata.class_package.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();

        tracing::info!(type_key = %decl.type_key, "attempting to register");
        let outcome = if sources.is_empty() {
            registries.nodes.discover(None, &decl.type_key).map(|_| ())
        } else {
            sources
                .iter()
                .map(|source| registries.nodes.discover(Some(*source), &decl.type_key))
                .find(Result::is_ok)
                .unwrap_or_else(|| Err(RegistryError::unknown_type(&decl.type_key)))
                .map(|_| ())
        };

        outcome.map_err(|e| ConfigurationError::CannotRegister {
            type_key: decl.type_key.clone(),
            reason: e.to_string(),
        })?;
    }

    Ok(())
}

fn build_dag(
    declarations: &[NodeDeclaration],
    conditional: &HashSet<String>,
) -> Result<ConfigurationDag, DagflowError> {
    let mut dag = ConfigurationDag::new();
    for decl in declarations {
        dag.add_node(decl.name.clone(), decl.section.clone())?;
        if conditional.contains(&decl.name) {
            dag.mark_conditional(&decl.name)?;
        }
    }
    for decl in declarations {
        for destination in decl.destinations() {
            dag.add_edge(&decl.name, &destination)?;
        }
    }
    tracing::info!("OK: good referential integrity");
    Ok(dag)
}
