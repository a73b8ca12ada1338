//! In-memory reference backend.
//!
//! A complete [`Backend`] over in-process vertices and edges. It exists so
//! the environment and session machinery can be exercised end to end
//! without an external store: tests and benchmarks drive it through the
//! typed mutation methods, and the bundled server registers one under the
//! name `memory`.
//!
//! The query surface is deliberately tiny (this crate defines no query
//! language):
//! - `ping` - liveness check, returns one `result=pong` row
//! - `labels` - one `label` row per distinct vertex label
//! - `graph <name>` - resolves a vertex label to a graph-shaped result row
//!
//! Anything else fails with an execution error, which is itself useful for
//! driving the session protocol's failure paths.

use super::{Backend, BackendError, BackendResult, Row, SentinelRecord};
use parking_lot::Mutex;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
struct Vertex {
    labels: BTreeSet<String>,
}

#[derive(Debug)]
struct Edge {
    from: usize,
    to: usize,
    symbols: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    sentinel: Option<SentinelRecord>,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    active: bool,
    activations: u64,
    deactivations: u64,
    sentinel_writes: u64,
    fail_sentinel_writes: bool,
    fail_activation: bool,
    fail_queries: Option<String>,
}

/// In-memory store with typed mutation hooks and test instrumentation.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex carrying the given labels; returns its id.
    pub fn add_vertex<I, S>(&self, labels: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock();
        state.vertices.push(Vertex {
            labels: labels.into_iter().map(Into::into).collect(),
        });
        state.vertices.len() - 1
    }

    /// Add a label to an existing vertex. Unknown ids are ignored.
    pub fn label_vertex(&self, vertex: usize, label: impl Into<String>) {
        let mut state = self.state.lock();
        if let Some(v) = state.vertices.get_mut(vertex) {
            v.labels.insert(label.into());
        }
    }

    /// Add an edge between two vertices; returns its id.
    pub fn add_edge(&self, from: usize, to: usize) -> usize {
        let mut state = self.state.lock();
        state.edges.push(Edge {
            from,
            to,
            symbols: BTreeSet::new(),
        });
        state.edges.len() - 1
    }

    /// Add a symbol name to an edge's multi-valued symbol field.
    pub fn tag_edge(&self, edge: usize, symbol: impl Into<String>) {
        let mut state = self.state.lock();
        if let Some(e) = state.edges.get_mut(edge) {
            e.symbols.insert(symbol.into());
        }
    }

    /// Number of vertices carrying the given label.
    pub fn vertices_with_label(&self, label: &str) -> usize {
        let state = self.state.lock();
        state
            .vertices
            .iter()
            .filter(|v| v.labels.contains(label))
            .count()
    }

    /// Total number of edges in the store.
    pub fn edge_count(&self) -> usize {
        self.state.lock().edges.len()
    }

    /// The symbol names currently on one edge, in order.
    pub fn edge_symbols_of(&self, edge: usize) -> Vec<String> {
        let state = self.state.lock();
        state
            .edges
            .get(edge)
            .map(|e| e.symbols.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Endpoints of one edge, if it exists.
    pub fn edge_endpoints(&self, edge: usize) -> Option<(usize, usize)> {
        let state = self.state.lock();
        state.edges.get(edge).map(|e| (e.from, e.to))
    }

    /// Whether the backend is currently some session's active storage.
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// How many times `activate` has run.
    pub fn activation_count(&self) -> u64 {
        self.state.lock().activations
    }

    /// How many times `deactivate` has run.
    pub fn deactivation_count(&self) -> u64 {
        self.state.lock().deactivations
    }

    /// How many sentinel writes have been accepted.
    pub fn sentinel_write_count(&self) -> u64 {
        self.state.lock().sentinel_writes
    }

    /// Make subsequent sentinel writes fail, for durability testing.
    pub fn set_fail_sentinel_writes(&self, fail: bool) {
        self.state.lock().fail_sentinel_writes = fail;
    }

    /// Make the next activation fail, for switch-procedure testing.
    pub fn set_fail_activation(&self, fail: bool) {
        self.state.lock().fail_activation = fail;
    }

    /// Make every query fail with the given message.
    pub fn set_fail_queries(&self, message: Option<String>) {
        self.state.lock().fail_queries = message;
    }

    fn run_query(&self, query: &str) -> BackendResult<Vec<Row>> {
        let state = self.state.lock();
        if let Some(message) = &state.fail_queries {
            return Err(BackendError::Execution(message.clone()));
        }

        let tokens: Vec<&str> = query.split_whitespace().collect();
        match tokens.as_slice() {
            ["ping"] => Ok(vec![Row::new().with("result", "pong")]),
            ["labels"] => {
                let labels: BTreeSet<&String> =
                    state.vertices.iter().flat_map(|v| &v.labels).collect();
                Ok(labels
                    .into_iter()
                    .map(|label| Row::new().with("label", label))
                    .collect())
            }
            ["graph", name] => {
                let exists = state.vertices.iter().any(|v| v.labels.contains(*name));
                if exists {
                    Ok(vec![Row::new().with("graph", *name)])
                } else {
                    Err(BackendError::Execution(format!(
                        "unknown graph label: {name}"
                    )))
                }
            }
            _ => Err(BackendError::Execution(format!(
                "unsupported query: {query}"
            ))),
        }
    }
}

impl Backend for MemoryBackend {
    fn execute(&self, query: &str) -> BackendResult<()> {
        self.run_query(query).map(|_| ())
    }

    fn execute_for_rows(&self, query: &str) -> BackendResult<Vec<Row>> {
        self.run_query(query)
    }

    fn activate(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.fail_activation {
            return Err(BackendError::Connection(
                "activation refused by store".to_string(),
            ));
        }
        state.active = true;
        state.activations += 1;
        Ok(())
    }

    fn deactivate(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.active = false;
        state.deactivations += 1;
        Ok(())
    }

    fn read_sentinel(&self) -> BackendResult<Option<SentinelRecord>> {
        Ok(self.state.lock().sentinel.clone())
    }

    fn write_sentinel(&self, record: &SentinelRecord) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.fail_sentinel_writes {
            return Err(BackendError::Connection(
                "sentinel write rejected".to_string(),
            ));
        }
        state.sentinel = Some(record.clone());
        state.sentinel_writes += 1;
        Ok(())
    }

    fn delete_sentinel(&self) -> BackendResult<()> {
        self.state.lock().sentinel = None;
        Ok(())
    }

    fn vertex_labels(&self) -> BackendResult<Vec<String>> {
        let state = self.state.lock();
        let labels: BTreeSet<String> = state
            .vertices
            .iter()
            .flat_map(|v| v.labels.iter().cloned())
            .collect();
        Ok(labels.into_iter().collect())
    }

    fn edge_symbols(&self) -> BackendResult<Vec<String>> {
        let state = self.state.lock();
        let symbols: BTreeSet<String> = state
            .edges
            .iter()
            .flat_map(|e| e.symbols.iter().cloned())
            .collect();
        Ok(symbols.into_iter().collect())
    }

    fn drop_vertex_labels(&self, labels: &[String]) -> BackendResult<()> {
        let mut state = self.state.lock();
        for vertex in &mut state.vertices {
            for label in labels {
                vertex.labels.remove(label);
            }
        }
        Ok(())
    }

    fn strip_edge_symbol(&self, symbol: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        for edge in &mut state.edges {
            edge.symbols.remove(symbol);
        }
        Ok(())
    }
}
