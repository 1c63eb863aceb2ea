//! Runs a validated configuration.
//!
//! A run moves through `Created → Validating → Executing` and ends in
//! `Completed`, `Terminated` or `Failed`. Validation turns the traverser's
//! candidate order into the final sequence; execution instantiates and runs
//! each node in turn against one [`DataStore`].

#[cfg(test)]
mod integration_tests;

use crate::config::{Configuration, NodeDeclaration};
use crate::errors::{DagflowError, ExecutionError, SequenceError};
use crate::nodes::NodeOutcome;
use crate::notify::Notifier;
use crate::observability::RunTimer;
use crate::registry::Registries;
use crate::store::DataStore;
use crate::traversal::Traverser;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Not started.
    Created,
    /// Building and checking the sequence.
    Validating,
    /// Running nodes.
    Executing,
    /// A node asked to stop early.
    Terminated,
    /// Every node in the sequence ran or was pruned.
    Completed,
    /// A fatal error ended the run.
    Failed,
}

impl RunState {
    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Validating => "validating",
            Self::Executing => "executing",
            Self::Terminated => "terminated",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns true once the run has ended.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Terminated | Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a single run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Validate and log the planned sequence without running anything.
    pub dry_run: bool,
}

impl RunOptions {
    /// Options for a dry run.
    #[must_use]
    pub const fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

/// What a run did.
#[derive(Debug)]
pub struct RunReport {
    /// Identifier attached to the run's log span.
    pub run_id: Uuid,
    /// Final state.
    pub state: RunState,
    /// The validated sequence.
    pub planned: Vec<String>,
    /// Nodes that ran, in order.
    pub executed: Vec<String>,
    /// Nodes skipped because they were pruned, in order.
    pub pruned: Vec<String>,
    /// The node that stopped the run early, if any.
    pub terminated_by: Option<String>,
    /// Where the data store was persisted, if it was.
    pub checkpoint_written: Option<PathBuf>,
    /// The data store after the run.
    pub store: DataStore,
    /// Wall-clock time of the run.
    pub duration_ms: f64,
}

impl RunReport {
    /// A JSON summary without the store contents.
    #[must_use]
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "run_id": self.run_id.to_string(),
            "state": self.state,
            "planned": self.planned,
            "executed": self.executed,
            "pruned": self.pruned,
            "terminated_by": self.terminated_by,
            "checkpoint_written": self.checkpoint_written,
            "producers": self.store.producers(),
            "duration_ms": self.duration_ms,
        })
    }
}

/// Orchestrates one configuration.
pub struct DagRunner {
    config: Arc<Configuration>,
    registries: Arc<Registries>,
    traverser: Box<dyn Traverser>,
    notifier: Option<Arc<dyn Notifier>>,
    state: RunState,
}

impl fmt::Debug for DagRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagRunner")
            .field("config_hash", &self.config.config_hash())
            .field("traverser", &self.traverser.name())
            .field("has_notifier", &self.notifier.is_some())
            .field("state", &self.state)
            .finish()
    }
}

impl DagRunner {
    /// Creates a runner, selecting the traverser the configuration asks for.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if the traverser is not registered.
    pub fn new(config: Arc<Configuration>, registries: Arc<Registries>) -> Result<Self, DagflowError> {
        let traverser = registries.traversers.for_configuration(&config)?;
        tracing::info!(traverser = %traverser.name(), "Traverser selected");
        Ok(Self {
            config,
            registries,
            traverser,
            notifier: None,
            state: RunState::Created,
        })
    }

    /// Uses `notifier` for failure notifications instead of `metadata.notify_on_error`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// The configuration being run.
    #[must_use]
    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.config
    }

    /// The selected traverser.
    #[must_use]
    pub fn traverser(&self) -> &dyn Traverser {
        self.traverser.as_ref()
    }

    /// Rejects sequences with duplicate or undeclared names.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateInSequence` or `UnknownInstance`.
    pub fn initial_check_sequence(&self, sequence: &[String]) -> Result<(), SequenceError> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for name in sequence {
            *counts.entry(name.as_str()).or_default() += 1;
        }
        let dupes: BTreeSet<&str> = counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(name, _)| name)
            .collect();
        if !dupes.is_empty() {
            return Err(SequenceError::DuplicateInSequence {
                names: dupes.into_iter().map(str::to_string).collect(),
            });
        }

        if let Some(unknown) = sequence.iter().find(|n| !self.config.has_instance(n)) {
            return Err(SequenceError::UnknownInstance { name: unknown.clone() });
        }
        Ok(())
    }

    /// Restricts a candidate sequence to the sections that should run.
    ///
    /// Traversers that do not run section by section must cover every node
    /// of those sections. For section-by-section traversers, the result must
    /// split into consecutive blocks holding exactly each section's nodes.
    /// The result never runs a node after something downstream of it.
    ///
    /// # Errors
    ///
    /// Returns a [`SequenceError`] describing the first problem found.
    pub fn filter_sequence(&self, sequence: &[String]) -> Result<Vec<String>, DagflowError> {
        self.initial_check_sequence(sequence)?;

        let (sections, source) = self.config.sections_in_order();
        tracing::info!(source = %source, sections = ?sections, "Taking nodes to run");

        let to_run: HashSet<String> = sections
            .iter()
            .flat_map(|s| self.config.section_members(s))
            .collect();
        let mut remaining: Vec<String> = sequence.iter().filter(|n| to_run.contains(*n)).cloned().collect();

        if !self.traverser.run_section_by_section() {
            let missing: BTreeSet<&String> = to_run.iter().filter(|n| !remaining.contains(*n)).collect();
            if !missing.is_empty() {
                return Err(SequenceError::MissingFromSequence {
                    names: missing.into_iter().cloned().collect(),
                }
                .into());
            }
            self.check_for_upstream(&remaining)?;
            return Ok(remaining);
        }

        let mut filtered = Vec::with_capacity(remaining.len());
        for section in &sections {
            let expected: BTreeSet<String> = self.config.section_members(section).into_iter().collect();
            let n = expected.len();
            if remaining.len() < n {
                return Err(SequenceError::SectionExhausted {
                    section: section.clone(),
                    expected: n,
                    remaining,
                }
                .into());
            }

            let rest = remaining.split_off(n);
            let block = std::mem::replace(&mut remaining, rest);
            let received: BTreeSet<String> = block.iter().cloned().collect();
            if received != expected {
                return Err(SequenceError::SectionMismatch {
                    section: section.clone(),
                    expected: expected.into_iter().collect(),
                    received: received.into_iter().collect(),
                }
                .into());
            }
            filtered.extend(block);
        }

        self.check_for_upstream(&filtered)?;
        Ok(filtered)
    }

    /// Fails if any node in `sequence` reaches a node placed before it.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamOrderViolation` for the first offending pair.
    pub fn check_for_upstream(&self, sequence: &[String]) -> Result<(), DagflowError> {
        let dag = self.config.dag();
        for (to_idx, to) in sequence.iter().enumerate() {
            for from in &sequence[to_idx + 1..] {
                if dag.has_path(from, to)? {
                    return Err(SequenceError::UpstreamOrderViolation {
                        from: from.clone(),
                        to: to.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Validates and, unless `dry_run` is set, executes the configuration.
    ///
    /// # Errors
    ///
    /// Any validation, execution or checkpoint error. The runner is left in
    /// [`RunState::Failed`].
    pub fn run(&mut self, options: RunOptions) -> Result<RunReport, DagflowError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "dag_run",
            run_id = %run_id,
            config_hash = %self.config.config_hash(),
            dry_run = options.dry_run,
        );
        let _guard = span.enter();

        let result = self.run_inner(run_id, options);
        if let Err(e) = &result {
            self.state = RunState::Failed;
            tracing::error!(code = e.code(), error = %e, "Run failed");
        }
        result
    }

    fn run_inner(&mut self, run_id: Uuid, options: RunOptions) -> Result<RunReport, DagflowError> {
        let timer = RunTimer::start("dag_run");
        self.state = RunState::Validating;

        let candidate = self.traverser.traversal_list(&self.config)?;
        let sequence = self.filter_sequence(&candidate)?;
        if candidate.len() > sequence.len() {
            tracing::info!(sequence = ?sequence, "Sequence of nodes to be run");
        }

        let notifier = self.resolve_notifier()?;

        if options.dry_run {
            for (step, name) in sequence.iter().enumerate() {
                let decl = self.declaration(name)?;
                tracing::info!(
                    step,
                    node = %name,
                    section = %decl.section,
                    type_key = %decl.type_key,
                    "DRY RUN: would run node"
                );
            }
            self.state = RunState::Completed;
            return Ok(RunReport {
                run_id,
                state: RunState::Completed,
                planned: sequence,
                executed: Vec::new(),
                pruned: Vec::new(),
                terminated_by: None,
                checkpoint_written: None,
                store: DataStore::new(Arc::clone(self.config.dag())),
                duration_ms: timer.finish(),
            });
        }

        self.state = RunState::Executing;
        let mut store = self.create_store()?;
        let mut pruning: BTreeSet<String> = BTreeSet::new();
        let mut executed = Vec::new();
        let mut pruned = Vec::new();
        let mut terminated_by = None;

        for name in &sequence {
            if pruning.contains(name) {
                tracing::info!(node = %name, "Skipping pruned node");
                pruned.push(name.clone());
                continue;
            }

            let decl = self.declaration(name)?;
            let outcome = self.execute_node(decl, &mut store, &mut pruning).map_err(|e| {
                notify_failure(notifier.as_deref(), &e);
                e
            })?;
            executed.push(name.clone());

            if outcome.is_terminate() {
                tracing::info!(node = %name, "Terminating early due to signal from node");
                terminated_by = Some(name.clone());
                break;
            }
        }

        let checkpoint_written = self.cache_store(&store)?;
        let state = if terminated_by.is_some() {
            RunState::Terminated
        } else {
            RunState::Completed
        };
        self.state = state;

        let duration_ms = timer.finish();
        tracing::info!(
            state = %state,
            executed = executed.len(),
            pruned = pruned.len(),
            duration_ms,
            "All done"
        );

        Ok(RunReport {
            run_id,
            state,
            planned: sequence,
            executed,
            pruned,
            terminated_by,
            checkpoint_written,
            store,
            duration_ms,
        })
    }

    fn declaration(&self, name: &str) -> Result<&NodeDeclaration, SequenceError> {
        self.config
            .declaration(name)
            .ok_or_else(|| SequenceError::UnknownInstance { name: name.to_string() })
    }

    fn resolve_notifier(&self) -> Result<Option<Arc<dyn Notifier>>, DagflowError> {
        if let Some(notifier) = &self.notifier {
            return Ok(Some(Arc::clone(notifier)));
        }
        let Some(cfg) = &self.config.metadata().notify_on_error else {
            return Ok(None);
        };
        match self.registries.notifiers.build(&cfg.client, &cfg.params) {
            Ok(notifier) => Ok(Some(Arc::from(notifier))),
            Err(e) => {
                tracing::error!(client = %cfg.client, error = %e, "Check client name and parameters");
                Err(e.into())
            }
        }
    }

    fn execute_node(
        &self,
        decl: &NodeDeclaration,
        store: &mut DataStore,
        pruning: &mut BTreeSet<String>,
    ) -> Result<NodeOutcome, ExecutionError> {
        let span = tracing::info_span!(
            "node",
            node = %decl.name,
            section = %decl.section,
            type_key = %decl.type_key,
        );
        let _guard = span.enter();
        tracing::info!("Running node");
        let timer = RunTimer::start(decl.name.as_str());

        let mut node = self
            .registries
            .nodes
            .instantiate(&decl.type_key, decl.node_init())
            .map_err(|e| ExecutionError::InstantiationFailed {
                node: decl.name.clone(),
                type_key: decl.type_key.clone(),
                message: e.to_string(),
            })?;

        let outcome = node.run(store).map_err(|source| ExecutionError::NodeFailed {
            node: decl.name.clone(),
            source,
        })?;

        if let Some(targets) = node.as_conditional().and_then(|c| c.destinations_to_prune()) {
            let destinations = decl.destinations();
            for target in targets {
                let prune_error = || ExecutionError::PruneTargetNotADestination {
                    node: decl.name.clone(),
                    destination: target.clone(),
                };
                if !destinations.contains(&target) {
                    return Err(prune_error());
                }
                let mut expanded = self.config.dag().descendants(&target).map_err(|_| prune_error())?;
                expanded.insert(target.clone());
                tracing::info!(destination = %target, pruned = ?expanded, "Pruning downstream nodes");
                pruning.extend(expanded);
            }
        }

        tracing::debug!(duration_ms = timer.finish(), outcome = ?outcome, "Node finished");
        Ok(outcome)
    }

    fn create_store(&self) -> Result<DataStore, DagflowError> {
        let dag = Arc::clone(self.config.dag());
        match self.config.metadata().checkpoint_read_path() {
            Some(path) => {
                tracing::info!(path = %path.display(), "Reading data store from checkpoint");
                Ok(DataStore::read_checkpoint(path, dag)?)
            }
            None => Ok(DataStore::new(dag)),
        }
    }

    fn cache_store(&self, store: &DataStore) -> Result<Option<PathBuf>, DagflowError> {
        let Some(path) = self.config.metadata().checkpoint_write_path() else {
            return Ok(None);
        };
        store.write_checkpoint(path)?;
        Ok(Some(path.clone()))
    }
}

fn notify_failure(notifier: Option<&dyn Notifier>, error: &ExecutionError) {
    let Some(notifier) = notifier else {
        return;
    };
    if let Err(e) = notifier.post_message(&error.to_string()) {
        tracing::warn!(error = %e, failure = %error, "Failed to send failure notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ConfigFixture;
    use pretty_assertions::assert_eq;

    fn runner(fixture: &ConfigFixture) -> DagRunner {
        let registries = Arc::new(Registries::with_builtins());
        let config = Arc::new(fixture.build(&registries).unwrap());
        DagRunner::new(config, registries).unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn chain() -> ConfigFixture {
        ConfigFixture::new()
            .node("reader_config", "read", "DoNothingNode", &["clean"])
            .node("pipeline_config", "clean", "DoNothingNode", &["write"])
            .node("writer_config", "write", "DoNothingNode", &[])
    }

    #[test]
    fn test_initial_check_rejects_duplicates_and_unknowns() {
        let runner = runner(&chain());
        assert_eq!(
            runner.initial_check_sequence(&names(&["read", "clean", "read"])),
            Err(SequenceError::DuplicateInSequence { names: names(&["read"]) })
        );
        assert_eq!(
            runner.initial_check_sequence(&names(&["read", "ghost"])),
            Err(SequenceError::UnknownInstance { name: "ghost".into() })
        );
        assert!(runner.initial_check_sequence(&names(&["read", "clean", "write"])).is_ok());
    }

    #[test]
    fn test_check_for_upstream() {
        let runner = runner(&chain());
        assert!(runner.check_for_upstream(&names(&["read", "clean", "write"])).is_ok());

        let err = runner.check_for_upstream(&names(&["clean", "write", "read"])).unwrap_err();
        assert!(matches!(
            err,
            DagflowError::Sequence(SequenceError::UpstreamOrderViolation { ref from, ref to })
                if from == "read" && to == "clean"
        ));
    }

    #[test]
    fn test_filter_sequence_section_blocks() {
        let runner = runner(&chain());
        assert_eq!(runner.traverser().name(), "layered");
        assert_eq!(
            runner.filter_sequence(&names(&["read", "clean", "write"])).unwrap(),
            names(&["read", "clean", "write"])
        );
    }

    #[test]
    fn test_filter_sequence_mismatch() {
        let runner = runner(
            &ConfigFixture::new()
                .node("reader_config", "read", "DoNothingNode", &["write_a", "write_b"])
                .node("writer_config", "write_a", "DoNothingNode", &[])
                .node("writer_config", "write_b", "DoNothingNode", &[])
                .metadata("section_registry", serde_json::json!(["writer_config", "reader_config"])),
        );

        let err = runner
            .filter_sequence(&names(&["write_a", "read", "write_b"]))
            .unwrap_err();
        match err {
            DagflowError::Sequence(SequenceError::SectionMismatch { section, expected, received }) => {
                assert_eq!(section, "writer_config");
                assert_eq!(expected, names(&["write_a", "write_b"]));
                assert_eq!(received, names(&["read", "write_a"]));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_filter_sequence_drops_unrequested_sections() {
        let runner = runner(&chain().section_run(&["pipeline_config", "writer_config"]));
        assert_eq!(
            runner.filter_sequence(&names(&["read", "clean", "write"])).unwrap(),
            names(&["clean", "write"])
        );
    }

    #[test]
    fn test_state_transitions() {
        let mut runner = runner(&chain());
        assert_eq!(runner.state(), RunState::Created);
        let report = runner.run(RunOptions::default()).unwrap();
        assert_eq!(runner.state(), RunState::Completed);
        assert_eq!(report.executed, names(&["read", "clean", "write"]));
        assert!(report.state.is_finished());
        assert_eq!(report.summary()["state"], serde_json::json!("completed"));
    }
}
