//! End-to-end runs over small configurations.

use super::*;
use crate::config::NodeConfig;
use crate::errors::ExecutionError;
use crate::nodes::{ConditionalPath, Node, NodeInit};
use crate::notify::MockNotifier;
use crate::store::{ResponseShape, StoreResponse};
use crate::testing::{register_mocks, ConfigFixture, ExecutionLog};
use crate::traversal::TraverserConstructor;
use pretty_assertions::assert_eq;
use serde_json::json;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

fn registries_with_mocks(log: &ExecutionLog) -> Registries {
    let registries = Registries::with_builtins();
    register_mocks(&registries.nodes, log);
    registries
}

fn build(registries: Registries, fixture: &ConfigFixture) -> Result<DagRunner, DagflowError> {
    let config = Arc::new(fixture.build(&registries)?);
    DagRunner::new(config, Arc::new(registries))
}

fn setup(fixture: &ConfigFixture) -> (DagRunner, ExecutionLog) {
    let log = ExecutionLog::new();
    let runner = build(registries_with_mocks(&log), fixture).unwrap();
    (runner, log)
}

fn execution_error(err: &DagflowError) -> &ExecutionError {
    match err {
        DagflowError::Execution(e) => e,
        other => panic!("expected execution error, got {other:?}"),
    }
}

fn reader_writer() -> ConfigFixture {
    ConfigFixture::new()
        .node("reader_config", "reader", "Producer", &["writer"])
        .node("writer_config", "writer", "Recording", &[])
}

/// Collects `(message, node)` pairs from emitted events.
#[derive(Clone, Default)]
struct EventCapture {
    events: Arc<parking_lot::Mutex<Vec<(String, Option<String>)>>>,
}

impl EventCapture {
    fn with_message(&self, message: &str) -> Vec<Option<String>> {
        self.events
            .lock()
            .iter()
            .filter(|(m, _)| m == message)
            .map(|(_, node)| node.clone())
            .collect()
    }
}

#[derive(Default)]
struct EventFields {
    message: String,
    node: Option<String>,
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "node" => self.node = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = EventFields::default();
        event.record(&mut fields);
        self.events.lock().push((fields.message, fields.node));
    }
}

#[test]
fn test_dry_run_plans_without_executing() {
    let (mut runner, log) = setup(&reader_writer());
    let capture = EventCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    let report =
        tracing::subscriber::with_default(subscriber, || runner.run(RunOptions::dry_run())).unwrap();

    assert_eq!(report.planned, names(&["reader", "writer"]));
    assert_eq!(
        capture.with_message("DRY RUN: would run node"),
        vec![Some("reader".to_string()), Some("writer".to_string())]
    );
    assert!(report.executed.is_empty());
    assert!(report.store.is_empty());
    assert!(log.is_empty());
    assert_eq!(runner.state(), RunState::Completed);
}

#[test]
fn test_full_run_threads_the_store() {
    let (mut runner, log) = setup(&reader_writer());

    let mut report = runner.run(RunOptions::default()).unwrap();

    assert_eq!(log.entries(), names(&["reader", "writer"]));
    assert_eq!(report.executed, report.planned);
    assert_eq!(
        report.store.get("reader", false, ResponseShape::Value).unwrap(),
        StoreResponse::Value(json!("reader"))
    );
    assert!(report.checkpoint_written.is_none());
}

#[test]
fn test_conditional_prunes_destination_and_descendants() {
    let fixture = ConfigFixture::new()
        .node_with(
            "reader_config",
            "switch",
            "SimpleSwitch",
            &["left", "right"],
            json!({"path_to_travel": "left"}),
        )
        .node("pipeline_config", "left", "Producer", &["left_out"])
        .node("pipeline_config", "right", "Producer", &["right_out"])
        .node("writer_config", "left_out", "Producer", &[])
        .node("writer_config", "right_out", "Producer", &[]);
    let (mut runner, log) = setup(&fixture);

    let report = runner.run(RunOptions::default()).unwrap();

    assert_eq!(report.executed, names(&["switch", "left", "left_out"]));
    let mut pruned = report.pruned.clone();
    pruned.sort();
    assert_eq!(pruned, names(&["right", "right_out"]));
    assert!(!log.contains("right"));
    assert!(!log.contains("right_out"));
    assert_eq!(report.store.producers(), names(&["left", "left_out"]));
}

#[derive(Debug)]
struct RoguePruner {
    name: String,
}

impl Node for RoguePruner {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn necessary_config(&self, _config: &NodeConfig) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn run(&mut self, _store: &mut DataStore) -> anyhow::Result<NodeOutcome> {
        Ok(NodeOutcome::Continue)
    }

    fn as_conditional(&self) -> Option<&dyn ConditionalPath> {
        Some(self)
    }
}

impl ConditionalPath for RoguePruner {
    fn destinations_to_prune(&self) -> Option<Vec<String>> {
        Some(vec!["elsewhere".to_string()])
    }
}

#[test]
fn test_pruning_a_non_destination_fails() {
    let log = ExecutionLog::new();
    let registries = registries_with_mocks(&log);
    registries
        .nodes
        .register(
            "Rogue",
            Arc::new(|init: NodeInit| {
                Ok(Box::new(RoguePruner {
                    name: init.instance_name,
                }) as Box<dyn Node>)
            }),
            false,
        )
        .unwrap();
    let fixture = ConfigFixture::new()
        .node("reader_config", "rogue", "Rogue", &["next"])
        .node("writer_config", "next", "Recording", &["elsewhere"])
        .node("cleanup_config", "elsewhere", "Recording", &[]);
    let mut runner = build(registries, &fixture).unwrap();

    let err = runner.run(RunOptions::default()).unwrap_err();

    assert!(matches!(
        execution_error(&err),
        ExecutionError::PruneTargetNotADestination { node, destination }
            if node == "rogue" && destination == "elsewhere"
    ));
    assert!(log.is_empty());
}

#[derive(Debug)]
struct FixedTraverser;

impl Traverser for FixedTraverser {
    fn name(&self) -> &str {
        "fixed"
    }

    fn traversal_list(&self, _config: &Configuration) -> Result<Vec<String>, DagflowError> {
        Ok(names(&["read", "write_a"]))
    }

    fn run_section_by_section(&self) -> bool {
        true
    }
}

#[test]
fn test_section_run_with_short_sequence_is_exhausted() {
    let log = ExecutionLog::new();
    let registries = registries_with_mocks(&log);
    let ctor: TraverserConstructor = Arc::new(|| Box::new(FixedTraverser) as Box<dyn Traverser>);
    registries.traversers.register("fixed", ctor, false).unwrap();
    let fixture = ConfigFixture::new()
        .node("reader_config", "read", "Recording", &["write_a", "write_b"])
        .node("writer_config", "write_a", "Recording", &[])
        .node("writer_config", "write_b", "Recording", &[])
        .traverser("fixed")
        .section_run(&["writer_config"]);
    let mut runner = build(registries, &fixture).unwrap();

    let err = runner.run(RunOptions::default()).unwrap_err();

    match &err {
        DagflowError::Sequence(SequenceError::SectionExhausted {
            section,
            expected,
            remaining,
        }) => {
            assert_eq!(section, "writer_config");
            assert_eq!(*expected, 2);
            assert_eq!(remaining, &names(&["write_a"]));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("missing 1"));
    assert!(log.is_empty());
    assert_eq!(runner.state(), RunState::Failed);
}

#[test]
fn test_node_sequence_runs_verbatim() {
    let fixture = ConfigFixture::new()
        .node("reader_config", "read_a", "Recording", &["write"])
        .node("reader_config", "read_b", "Recording", &["write"])
        .node("writer_config", "write", "Recording", &[])
        .node_sequence(&["read_b", "read_a", "write"]);
    let (mut runner, log) = setup(&fixture);

    runner.run(RunOptions::default()).unwrap();

    assert_eq!(log.entries(), names(&["read_b", "read_a", "write"]));
}

#[test]
fn test_node_sequence_out_of_order_rejected() {
    let fixture = reader_writer().node_sequence(&["writer", "reader"]);
    let (mut runner, log) = setup(&fixture);

    let err = runner.run(RunOptions::default()).unwrap_err();

    assert!(matches!(
        err,
        DagflowError::Sequence(SequenceError::UpstreamOrderViolation { ref from, ref to })
            if from == "reader" && to == "writer"
    ));
    assert!(log.is_empty());
}

#[test]
fn test_incomplete_node_sequence_rejected() {
    let fixture = reader_writer().node_sequence(&["reader"]);
    let (mut runner, log) = setup(&fixture);

    let err = runner.run(RunOptions::default()).unwrap_err();

    assert!(matches!(
        err,
        DagflowError::Sequence(SequenceError::MissingFromSequence { ref names })
            if names == &["writer".to_string()]
    ));
    assert_eq!(err.code(), "SEQUENCE-MISSING");
    assert!(log.is_empty());
    assert_eq!(runner.state(), RunState::Failed);
}

#[test]
fn test_node_sequence_only_covers_sections_run() {
    let fixture = reader_writer()
        .section_run(&["reader_config"])
        .node_sequence(&["reader"]);
    let (mut runner, log) = setup(&fixture);

    let report = runner.run(RunOptions::default()).unwrap();

    assert_eq!(report.executed, names(&["reader"]));
    assert_eq!(log.entries(), names(&["reader"]));
}

#[test]
fn test_depth_first_diamond() {
    let fixture = ConfigFixture::new()
        .node("reader_config", "a", "Recording", &["b", "c"])
        .node("pipeline_config", "b", "Recording", &["d"])
        .node("pipeline_config", "c", "Recording", &["d"])
        .node("writer_config", "d", "Recording", &[])
        .traverser("depth_first");
    let (mut runner, log) = setup(&fixture);

    runner.run(RunOptions::default()).unwrap();

    let order = log.entries();
    let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
    assert_eq!(order.len(), 4);
    assert_eq!(pos("a"), 0);
    assert!(pos("d") > pos("b"));
    assert!(pos("d") > pos("c"));
}

#[test]
fn test_terminate_stops_run_and_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let fixture = ConfigFixture::new()
        .node("reader_config", "reader", "Producer", &["stop"])
        .node("pipeline_config", "stop", "Terminating", &["writer"])
        .node("writer_config", "writer", "Recording", &[])
        .metadata(
            "data_object",
            json!({"write_to_cache": true, "write_filename": path.to_str().unwrap()}),
        );
    let (mut runner, log) = setup(&fixture);

    let report = runner.run(RunOptions::default()).unwrap();

    assert_eq!(report.state, RunState::Terminated);
    assert_eq!(report.terminated_by.as_deref(), Some("stop"));
    assert_eq!(log.entries(), names(&["reader", "stop"]));
    assert_eq!(report.checkpoint_written.as_deref(), Some(path.as_path()));
    assert!(path.exists());
}

#[test]
fn test_checkpoint_restored_on_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let path_str = path.to_str().unwrap();

    let first = reader_writer().metadata(
        "data_object",
        json!({"write_to_cache": true, "write_filename": path_str}),
    );
    let (mut runner, _) = setup(&first);
    let written = runner.run(RunOptions::default()).unwrap();

    let second = ConfigFixture::new()
        .node("reader_config", "reader", "Recording", &["writer"])
        .node("writer_config", "writer", "Recording", &[])
        .metadata(
            "data_object",
            json!({"read_from_cache": true, "read_filename": path_str}),
        );
    let (mut runner, log) = setup(&second);
    let restored = runner.run(RunOptions::default()).unwrap();

    assert_eq!(log.len(), 2);
    assert_eq!(restored.store.entries(), written.store.entries());
}

#[test]
fn test_failed_run_writes_no_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let fixture = ConfigFixture::new()
        .node("reader_config", "reader", "Producer", &["boom"])
        .node("writer_config", "boom", "Failing", &[])
        .metadata(
            "data_object",
            json!({"write_to_cache": true, "write_filename": path.to_str().unwrap()}),
        );
    let (mut runner, _) = setup(&fixture);

    assert!(runner.run(RunOptions::default()).is_err());
    assert!(!path.exists());
}

#[test]
fn test_node_failure_notifies_and_aborts() {
    let fixture = ConfigFixture::new()
        .node("reader_config", "reader", "Recording", &["boom"])
        .node_with("pipeline_config", "boom", "Failing", &["writer"], json!({"error": "bad rows"}))
        .node("writer_config", "writer", "Recording", &[]);
    let (runner, log) = setup(&fixture);

    let mut notifier = MockNotifier::new();
    notifier
        .expect_post_message()
        .withf(|message| message.contains("Issue with boom") && message.contains("bad rows"))
        .times(1)
        .returning(|_| Ok(()));
    let mut runner = runner.with_notifier(Arc::new(notifier));

    let err = runner.run(RunOptions::default()).unwrap_err();

    assert!(matches!(execution_error(&err), ExecutionError::NodeFailed { node, .. } if node == "boom"));
    assert_eq!(log.entries(), names(&["reader", "boom"]));
    assert_eq!(runner.state(), RunState::Failed);
    assert!(!err.is_pre_execution());
}

#[test]
fn test_notifier_error_does_not_mask_failure() {
    let fixture = reader_writer().node("writer_config", "writer", "Failing", &[]);
    let (runner, _) = setup(&fixture);

    let mut notifier = MockNotifier::new();
    notifier
        .expect_post_message()
        .times(1)
        .returning(|_| Err(anyhow::anyhow!("webhook down")));
    let mut runner = runner.with_notifier(Arc::new(notifier));

    let err = runner.run(RunOptions::default()).unwrap_err();
    assert_eq!(err.code(), "EXEC-NODE-FAILED");
}

#[test]
fn test_instantiation_failure_is_fatal() {
    let log = ExecutionLog::new();
    let registries = registries_with_mocks(&log);
    let fixture = reader_writer();
    let config = Arc::new(fixture.build(&registries).unwrap());
    registries
        .nodes
        .register(
            "Recording",
            Arc::new(|_: NodeInit| -> anyhow::Result<Box<dyn Node>> { Err(anyhow::anyhow!("no connection")) }),
            true,
        )
        .unwrap();
    let mut runner = DagRunner::new(config, Arc::new(registries)).unwrap();

    let mut notifier = MockNotifier::new();
    notifier.expect_post_message().times(1).returning(|_| Ok(()));
    runner = runner.with_notifier(Arc::new(notifier));

    let err = runner.run(RunOptions::default()).unwrap_err();

    assert!(matches!(
        execution_error(&err),
        ExecutionError::InstantiationFailed { node, type_key, message }
            if node == "writer" && type_key == "Recording" && message.contains("no connection")
    ));
    assert_eq!(log.entries(), names(&["reader"]));
}

#[test]
fn test_unknown_notification_client_aborts_before_execution() {
    let fixture = reader_writer().metadata("notify_on_error", json!({"client": "PagerClient"}));
    let (mut runner, log) = setup(&fixture);

    let err = runner.run(RunOptions::default()).unwrap_err();

    assert!(matches!(
        execution_error(&err),
        ExecutionError::NotifierUnavailable { client, .. } if client == "PagerClient"
    ));
    assert!(log.is_empty());
}

#[derive(Debug)]
struct SumUpstream {
    name: String,
}

impl Node for SumUpstream {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn necessary_config(&self, _config: &NodeConfig) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn run(&mut self, store: &mut DataStore) -> anyhow::Result<NodeOutcome> {
        let upstream = store
            .get_upstream_data(&self.name, false, ResponseShape::Value, None)?
            .into_producer_map()
            .ok_or_else(|| anyhow::anyhow!("expected several producers"))?;
        let total: i64 = upstream
            .values()
            .filter_map(|m| m.get("data").and_then(serde_json::Value::as_i64))
            .sum();
        store.add(&self.name, json!(total))?;
        Ok(NodeOutcome::Continue)
    }
}

#[test]
fn test_node_reads_upstream_producers() {
    let log = ExecutionLog::new();
    let registries = registries_with_mocks(&log);
    registries
        .nodes
        .register(
            "SumUpstream",
            Arc::new(|init: NodeInit| {
                Ok(Box::new(SumUpstream {
                    name: init.instance_name,
                }) as Box<dyn Node>)
            }),
            false,
        )
        .unwrap();
    let fixture = ConfigFixture::new()
        .node_with("reader_config", "a", "Producer", &["sum"], json!({"value": 1}))
        .node_with("reader_config", "b", "Producer", &["sum"], json!({"value": 2}))
        .node("model_config", "sum", "SumUpstream", &[]);
    let mut runner = build(registries, &fixture).unwrap();

    let mut report = runner.run(RunOptions::default()).unwrap();

    assert_eq!(
        report.store.get("sum", false, ResponseShape::Value).unwrap(),
        StoreResponse::Value(json!(3))
    );
}
