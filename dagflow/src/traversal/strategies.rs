//! Built-in traversal strategies.

use super::Traverser;
use crate::config::Configuration;
use crate::errors::DagflowError;
use std::collections::HashMap;

/// Reversed depth-first post-order over the whole graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthFirstTraverser;

impl DepthFirstTraverser {
    /// Registry name.
    pub const NAME: &'static str = "depth_first";
}

impl Traverser for DepthFirstTraverser {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn traversal_list(&self, config: &Configuration) -> Result<Vec<String>, DagflowError> {
        Ok(config.dag().depth_first_order())
    }

    fn run_section_by_section(&self) -> bool {
        false
    }
}

/// Runs whole sections in order, each section sorted by depth-first position.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayeredTraverser;

impl LayeredTraverser {
    /// Registry name.
    pub const NAME: &'static str = "layered";
}

impl Traverser for LayeredTraverser {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn traversal_list(&self, config: &Configuration) -> Result<Vec<String>, DagflowError> {
        let positions: HashMap<String, usize> = config
            .dag()
            .depth_first_order()
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect();

        let (sections, source) = config.sections_in_order();
        tracing::debug!(source = %source, sections = ?sections, "Layering sections");

        let mut sequence = Vec::new();
        for section in &sections {
            let mut members = config.section_members(section);
            members.sort_by_key(|name| positions.get(name).copied().unwrap_or(usize::MAX));
            sequence.extend(members);
        }
        Ok(sequence)
    }

    fn run_section_by_section(&self) -> bool {
        true
    }
}

/// Returns `metadata.node_sequence` as given.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitSequenceTraverser;

impl ExplicitSequenceTraverser {
    /// Registry name.
    pub const NAME: &'static str = "explicit";
}

impl Traverser for ExplicitSequenceTraverser {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn traversal_list(&self, config: &Configuration) -> Result<Vec<String>, DagflowError> {
        Ok(config.metadata().node_sequence.clone())
    }

    fn run_section_by_section(&self) -> bool {
        false
    }
}
