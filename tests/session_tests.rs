//! Query session protocol tests.
//!
//! Drives full sessions over the in-process channel transport: reserved
//! verbs, the storage-switch procedure, liveness re-validation, failure
//! envelopes, transform-chain application, and transport-failure
//! termination.

use provstore::{
    channel_pair, ChannelClient, Graph, MemoryBackend, QueryContext, QueryEnvelope, QueryResult,
    QuerySession, QueryTransport, Registry, Row, SessionConfig, Transform, TransformError,
    TransportError,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

// ============================================================================
// Test Helpers
// ============================================================================

fn registry_with_memory() -> (Arc<Registry>, Arc<MemoryBackend>) {
    let registry = Arc::new(Registry::new());
    let backend = Arc::new(MemoryBackend::new());
    registry.register("memory", backend.clone());
    (registry, backend)
}

fn spawn_session(registry: Arc<Registry>, config: SessionConfig) -> (ChannelClient, JoinHandle<()>) {
    let (transport, client) = channel_pair();
    let handle = thread::spawn(move || {
        QuerySession::new(registry, transport, config).run();
    });
    (client, handle)
}

fn exchange(client: &ChannelClient, query: &str) -> QueryEnvelope {
    client.send(query).expect("session accepts queries");
    client.recv().expect("session answers every query")
}

struct SuffixTransform {
    label: String,
    suffix: String,
}

impl SuffixTransform {
    fn new(label: &str, suffix: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            suffix: suffix.to_string(),
        })
    }
}

impl Transform for SuffixTransform {
    fn name(&self) -> &str {
        &self.label
    }

    fn apply(
        &self,
        graph: &Graph,
        _context: &QueryContext,
    ) -> Result<Option<Graph>, TransformError> {
        Ok(Some(Graph::new(format!("{}{}", graph.name, self.suffix))))
    }
}

struct DropTransform;

impl Transform for DropTransform {
    fn name(&self) -> &str {
        "drop"
    }

    fn apply(
        &self,
        _graph: &Graph,
        _context: &QueryContext,
    ) -> Result<Option<Graph>, TransformError> {
        Ok(None)
    }
}

struct FailingTransform;

impl Transform for FailingTransform {
    fn name(&self) -> &str {
        "failing"
    }

    fn apply(
        &self,
        _graph: &Graph,
        _context: &QueryContext,
    ) -> Result<Option<Graph>, TransformError> {
        Err(TransformError::new("boom"))
    }
}

// ============================================================================
// Reserved Verbs
// ============================================================================

#[test]
fn unknown_storage_then_clean_exit_never_touches_hooks() {
    let (registry, backend) = registry_with_memory();
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    let response = exchange(&client, "set storage neo4j");
    assert!(!response.success);
    assert!(response.error.unwrap().contains("not found"));

    let response = exchange(&client, "exit");
    assert!(response.success);

    handle.join().unwrap();
    // Nothing was ever active, so no lifecycle hook ran.
    assert_eq!(backend.activation_count(), 0);
    assert_eq!(backend.deactivation_count(), 0);
}

#[test]
fn quit_is_case_insensitive() {
    let (registry, _backend) = registry_with_memory();
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    let response = exchange(&client, "  QUIT  ");
    assert!(response.success);
    assert_eq!(
        response.result,
        Some(QueryResult::Message {
            text: "Exiting!".to_string()
        })
    );
    handle.join().unwrap();
}

#[test]
fn print_storage_reports_none_then_the_active_name() {
    let (registry, _backend) = registry_with_memory();
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    let response = exchange(&client, "print storage");
    assert!(response.success);
    assert_eq!(
        response.result,
        Some(QueryResult::Message {
            text: "No current storage set".to_string()
        })
    );

    assert!(exchange(&client, "SET STORAGE memory").success);
    let response = exchange(&client, "Print Storage");
    assert_eq!(
        response.result,
        Some(QueryResult::Message {
            text: "memory".to_string()
        })
    );

    exchange(&client, "exit");
    handle.join().unwrap();
}

#[test]
fn missing_storage_name_is_rejected() {
    let (registry, _backend) = registry_with_memory();
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    let response = exchange(&client, "set storage");
    assert!(!response.success);
    assert!(response.error.unwrap().contains("Missing storage_name"));

    exchange(&client, "exit");
    handle.join().unwrap();
}

// ============================================================================
// Storage Switch Procedure
// ============================================================================

#[test]
fn switching_storage_runs_the_activation_hook() {
    let (registry, backend) = registry_with_memory();
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    let response = exchange(&client, "set storage memory");
    assert!(response.success);
    assert!(backend.is_active());
    assert_eq!(backend.activation_count(), 1);

    exchange(&client, "exit");
    handle.join().unwrap();
    // Loop exit deactivates whatever is still active.
    assert!(!backend.is_active());
    assert_eq!(backend.deactivation_count(), 1);
}

#[test]
fn failed_switch_never_leaves_a_stale_backend() {
    let (registry, backend) = registry_with_memory();
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    assert!(exchange(&client, "set storage memory").success);
    assert_eq!(backend.activation_count(), 1);

    // Switching to an unknown name tears the old backend down first.
    let response = exchange(&client, "set storage nope");
    assert!(!response.success);
    assert!(response.error.unwrap().contains("not found"));
    assert_eq!(backend.deactivation_count(), 1);
    assert!(!backend.is_active());

    let response = exchange(&client, "ping");
    assert!(!response.success);
    assert!(response.error.unwrap().contains("No storage set"));

    exchange(&client, "exit");
    handle.join().unwrap();
    // Already torn down; exit must not deactivate again.
    assert_eq!(backend.deactivation_count(), 1);
}

#[test]
fn activation_failure_clears_the_active_backend() {
    let (registry, backend) = registry_with_memory();
    backend.set_fail_activation(true);
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    let response = exchange(&client, "set storage memory");
    assert!(!response.success);
    assert!(response.error.unwrap().contains("Failed to set storage"));

    let response = exchange(&client, "print storage");
    assert_eq!(
        response.result,
        Some(QueryResult::Message {
            text: "No current storage set".to_string()
        })
    );

    exchange(&client, "exit");
    handle.join().unwrap();
}

#[test]
fn switching_between_backends_swaps_the_hooks() {
    let (registry, first) = registry_with_memory();
    let second = Arc::new(MemoryBackend::new());
    registry.register("archive", second.clone());
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    assert!(exchange(&client, "set storage memory").success);
    assert!(exchange(&client, "set storage archive").success);

    assert!(!first.is_active());
    assert_eq!(first.deactivation_count(), 1);
    assert!(second.is_active());

    exchange(&client, "exit");
    handle.join().unwrap();
    assert!(!second.is_active());
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn dispatch_without_storage_directs_the_client_to_select_one() {
    let (registry, _backend) = registry_with_memory();
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    let response = exchange(&client, "labels");
    assert!(!response.success);
    assert!(response
        .error
        .unwrap()
        .contains("set storage <storage_name>"));

    exchange(&client, "exit");
    handle.join().unwrap();
}

#[test]
fn execution_errors_become_envelopes_and_the_session_survives() {
    let (registry, _backend) = registry_with_memory();
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    assert!(exchange(&client, "set storage memory").success);

    let response = exchange(&client, "definitely not a query");
    assert!(!response.success);
    let error = response.error.unwrap();
    assert!(error.contains("Failed to execute query"));
    assert!(error.contains("unsupported query"));

    // The session keeps serving queries afterwards.
    let response = exchange(&client, "ping");
    assert!(response.success);
    assert_eq!(
        response.result,
        Some(QueryResult::Rows {
            rows: vec![Row::new().with("result", "pong")]
        })
    );

    exchange(&client, "exit");
    handle.join().unwrap();
}

#[test]
fn scripted_backend_failure_carries_its_message() {
    let (registry, backend) = registry_with_memory();
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    assert!(exchange(&client, "set storage memory").success);
    backend.set_fail_queries(Some("store exploded".to_string()));

    let response = exchange(&client, "ping");
    assert!(!response.success);
    assert!(response.error.unwrap().contains("store exploded"));

    backend.set_fail_queries(None);
    assert!(exchange(&client, "ping").success);

    exchange(&client, "exit");
    handle.join().unwrap();
}

#[test]
fn deregistered_storage_is_detected_on_next_dispatch() {
    let (registry, backend) = registry_with_memory();
    let (client, handle) = spawn_session(registry.clone(), SessionConfig::default());

    assert!(exchange(&client, "set storage memory").success);
    registry.deregister("memory");

    let response = exchange(&client, "ping");
    assert!(!response.success);
    assert!(response.error.unwrap().contains("has been removed"));
    // The stale backend was deactivated and cleared.
    assert_eq!(backend.deactivation_count(), 1);

    let response = exchange(&client, "set storage memory");
    assert!(!response.success);
    assert!(response.error.unwrap().contains("not found"));

    exchange(&client, "exit");
    handle.join().unwrap();
    assert_eq!(backend.deactivation_count(), 1);
}

#[test]
fn clean_eof_terminates_and_deactivates() {
    let (registry, backend) = registry_with_memory();
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    assert!(exchange(&client, "set storage memory").success);
    drop(client); // hang up without saying exit

    handle.join().unwrap();
    assert!(!backend.is_active());
    assert_eq!(backend.deactivation_count(), 1);
}

// ============================================================================
// Transform Chain
// ============================================================================

fn graph_fixture(backend: &MemoryBackend) {
    backend.add_vertex(["graph_7"]);
}

#[test]
fn transforms_apply_in_registration_order() {
    let (registry, backend) = registry_with_memory();
    graph_fixture(&backend);
    registry.add_transform(SuffixTransform::new("first", "_a"));
    registry.add_transform(SuffixTransform::new("second", "_b"));
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    assert!(exchange(&client, "set storage memory").success);
    let response = exchange(&client, "graph graph_7");
    assert!(response.success);
    assert_eq!(
        response.result,
        Some(QueryResult::Graph {
            graph: Graph::new("graph_7_a_b")
        })
    );

    exchange(&client, "exit");
    handle.join().unwrap();
}

#[test]
fn a_null_transform_short_circuits_to_an_empty_result() {
    let (registry, backend) = registry_with_memory();
    graph_fixture(&backend);
    registry.add_transform(Arc::new(DropTransform));
    registry.add_transform(SuffixTransform::new("late", "_never"));
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    assert!(exchange(&client, "set storage memory").success);
    let response = exchange(&client, "graph graph_7");
    assert!(response.success);
    assert_eq!(response.result, Some(QueryResult::Empty));

    exchange(&client, "exit");
    handle.join().unwrap();
}

#[test]
fn a_failing_transform_keeps_the_last_good_graph() {
    let (registry, backend) = registry_with_memory();
    graph_fixture(&backend);
    registry.add_transform(SuffixTransform::new("first", "_a"));
    registry.add_transform(Arc::new(FailingTransform));
    registry.add_transform(SuffixTransform::new("after", "_c"));
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    assert!(exchange(&client, "set storage memory").success);
    let response = exchange(&client, "graph graph_7");
    assert!(response.success);
    assert_eq!(
        response.result,
        Some(QueryResult::Graph {
            graph: Graph::new("graph_7_a")
        })
    );

    exchange(&client, "exit");
    handle.join().unwrap();
}

#[test]
fn transforms_can_be_disabled_by_config() {
    let (registry, backend) = registry_with_memory();
    graph_fixture(&backend);
    registry.add_transform(SuffixTransform::new("first", "_a"));
    let config = SessionConfig {
        apply_transforms: false,
        ..SessionConfig::default()
    };
    let (client, handle) = spawn_session(registry, config);

    assert!(exchange(&client, "set storage memory").success);
    let response = exchange(&client, "graph graph_7");
    assert_eq!(
        response.result,
        Some(QueryResult::Graph {
            graph: Graph::new("graph_7")
        })
    );

    exchange(&client, "exit");
    handle.join().unwrap();
}

#[test]
fn row_results_bypass_the_transform_chain() {
    let (registry, backend) = registry_with_memory();
    graph_fixture(&backend);
    registry.add_transform(SuffixTransform::new("first", "_a"));
    let (client, handle) = spawn_session(registry, SessionConfig::default());

    assert!(exchange(&client, "set storage memory").success);
    let response = exchange(&client, "labels");
    assert!(response.success);
    assert_eq!(
        response.result,
        Some(QueryResult::Rows {
            rows: vec![Row::new().with("label", "graph_7")]
        })
    );

    exchange(&client, "exit");
    handle.join().unwrap();
}

// ============================================================================
// Transport Failure
// ============================================================================

/// Transport with scripted reads whose writes always fail.
struct BrokenPipeTransport {
    queries: Arc<Mutex<VecDeque<String>>>,
}

impl QueryTransport for BrokenPipeTransport {
    fn read_query(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.queries.lock().unwrap().pop_front())
    }

    fn write_response(&mut self, _envelope: &QueryEnvelope) -> Result<(), TransportError> {
        Err(TransportError::Write("broken pipe".to_string()))
    }
}

#[test]
fn repeated_write_failures_terminate_the_session() {
    let (registry, _backend) = registry_with_memory();
    let queries: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(
        (0..5).map(|_| "print storage".to_string()).collect(),
    ));
    let transport = BrokenPipeTransport {
        queries: queries.clone(),
    };

    let config = SessionConfig {
        max_write_failures: 3,
        ..SessionConfig::default()
    };
    QuerySession::new(registry, transport, config).run();

    // Terminated after the third failed write, leaving two queries unread.
    assert_eq!(queries.lock().unwrap().len(), 2);
}

/// Transport whose read fails immediately; writes are collected.
struct UnreadableTransport {
    written: Arc<Mutex<Vec<QueryEnvelope>>>,
}

impl QueryTransport for UnreadableTransport {
    fn read_query(&mut self) -> Result<Option<String>, TransportError> {
        Err(TransportError::Read("connection reset".to_string()))
    }

    fn write_response(&mut self, envelope: &QueryEnvelope) -> Result<(), TransportError> {
        self.written.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

#[test]
fn a_read_error_answers_a_failure_envelope_then_terminates() {
    let (registry, _backend) = registry_with_memory();
    let written = Arc::new(Mutex::new(Vec::new()));
    let transport = UnreadableTransport {
        written: written.clone(),
    };

    QuerySession::new(registry, transport, SessionConfig::default()).run();

    let written = written.lock().unwrap();
    assert_eq!(written.len(), 1);
    assert!(!written[0].success);
    assert!(written[0].error.as_ref().unwrap().contains("read"));
}
