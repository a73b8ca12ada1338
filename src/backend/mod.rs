//! Backing store interface.
//!
//! A [`Backend`] executes query text against one concrete data store and
//! exposes the small set of store primitives the query environment needs:
//! sentinel-record access for persisted namespace state, and the
//! enumerate/drop/strip operations the garbage collector sweeps with. The
//! core never speaks a store's native dialect; relational and graph-native
//! stores implement these primitives in whatever dialect they have.
//!
//! The crate ships one implementation, [`MemoryBackend`], used by tests,
//! benchmarks, and the bundled server. Production stores live outside this
//! crate and are registered through the
//! [`Registry`](crate::registry::Registry).

mod memory;

pub use memory::MemoryBackend;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend operation errors.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The store rejected or failed a query.
    #[error("query execution failed: {0}")]
    Execution(String),

    /// The store is unreachable or its connection broke.
    #[error("storage connection failed: {0}")]
    Connection(String),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// One materialized result row: an ordered list of `(column, value)` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, String)>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column, builder-style.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.columns.push((column.into(), value.into()));
        self
    }

    /// Look up a column value by name.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Iterate the columns in order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// The persisted environment state, held in one singleton store element
/// tagged with the reserved sentinel marker.
///
/// Fields are kept as raw strings: the environment parses and repairs them
/// on load, so a store can hand back whatever it has without failing the
/// read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelRecord {
    /// Stringified monotone ID counter.
    pub id_counter: String,
    /// Encoded graph symbol map (see [`crate::environment::codec`]).
    pub graph_symbols: String,
    /// Encoded graph-metadata symbol map.
    pub graph_metadata_symbols: String,
}

impl SentinelRecord {
    /// A fresh record: counter 0, both maps empty.
    pub fn empty() -> Self {
        Self {
            id_counter: "0".to_string(),
            graph_symbols: String::new(),
            graph_metadata_symbols: String::new(),
        }
    }
}

/// A pluggable backing data store.
///
/// The first four operations are the query surface the session protocol
/// forwards to; the rest are the store primitives the query environment
/// builds its persisted namespace and garbage collector on. Implementations
/// must be safe to share across sessions (`Send + Sync`), and every method
/// takes `&self`: interior locking is the implementation's business.
pub trait Backend: Send + Sync {
    /// Execute query text for its side effects. No result payload.
    fn execute(&self, query: &str) -> BackendResult<()>;

    /// Execute query text and materialize a small, bounded row set.
    fn execute_for_rows(&self, query: &str) -> BackendResult<Vec<Row>>;

    /// Called when this backend becomes a session's active storage.
    fn activate(&self) -> BackendResult<()>;

    /// Called when this backend ceases to be a session's active storage.
    fn deactivate(&self) -> BackendResult<()>;

    /// Read the sentinel record, if one exists.
    fn read_sentinel(&self) -> BackendResult<Option<SentinelRecord>>;

    /// Write the sentinel record, creating or replacing the singleton.
    fn write_sentinel(&self, record: &SentinelRecord) -> BackendResult<()>;

    /// Delete the sentinel record if present.
    fn delete_sentinel(&self) -> BackendResult<()>;

    /// All distinct vertex labels currently in the store.
    fn vertex_labels(&self) -> BackendResult<Vec<String>>;

    /// All distinct symbol names carried in edge multi-valued symbol fields.
    fn edge_symbols(&self) -> BackendResult<Vec<String>>;

    /// Remove the given labels from every vertex carrying them. Vertices
    /// themselves are not deleted.
    fn drop_vertex_labels(&self, labels: &[String]) -> BackendResult<()>;

    /// Remove one symbol name from every edge's symbol field, leaving the
    /// edge and any co-resident names untouched.
    fn strip_edge_symbol(&self, symbol: &str) -> BackendResult<()>;
}
