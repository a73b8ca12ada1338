//! Query environment: the persisted graph-symbol namespace.
//!
//! One environment is bound to one backend and owns three pieces of
//! persisted state: a monotone ID counter and the two symbol maps (graph
//! and graph-metadata). All three live in a singleton sentinel record in
//! the backend, tagged with the reserved [`SENTINEL_LABEL`] marker so it
//! can never be confused with user data.
//!
//! ## Invariants
//!
//! - Generated names draw from the disjoint reserved prefixes `graph_` and
//!   `meta_`, so they are distinguishable from user-authored labels.
//! - The ID counter only moves forward; neither erasing a symbol nor a
//!   full [`clear`](QueryEnvironment::clear) frees a number, so a stale
//!   handle can never silently resolve to new data.
//! - The base graph resolves under the reserved `$base` symbol, lives
//!   outside the mutable map, and is never garbage-collected.
//! - Counter and map mutations share one mutex, and [`gc`] sweeps under
//!   that same mutex, so the live set it computes is always a consistent
//!   snapshot relative to concurrent symbol mutations.
//!
//! ## Reclamation
//!
//! Erasing a symbol removes only the binding. The backend-resident labels
//! it named stay put until [`gc`] runs: mark (names of bound graph symbols
//! plus the protected reserved names), then sweep every generated-prefix
//! label the mark did not reach. Edges carry symbol *sets* in one
//! multi-valued field, so the edge sweep strips dead names one at a time
//! and never deletes the edge or touches a live co-resident name.
//!
//! [`gc`]: QueryEnvironment::gc

pub mod codec;

use crate::backend::{Backend, BackendError, SentinelRecord};
use crate::graph::{Graph, GraphMetadata};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Reserved symbol that always resolves to the base graph.
pub const BASE_SYMBOL: &str = "$base";

/// Reserved prefix for generated graph names.
pub const GRAPH_NAME_PREFIX: &str = "graph_";

/// Reserved prefix for generated graph-metadata names.
pub const METADATA_NAME_PREFIX: &str = "meta_";

/// Reserved marker label on the sentinel record.
pub const SENTINEL_LABEL: &str = "provstore_symbols";

/// Whether a backend label belongs to either generated namespace.
pub fn is_generated_name(name: &str) -> bool {
    name.starts_with(GRAPH_NAME_PREFIX) || name.starts_with(METADATA_NAME_PREFIX)
}

/// Environment operation errors.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// Attempt to rebind or erase a reserved symbol. The table is
    /// unchanged.
    #[error("cannot rebind or erase the reserved symbol '{symbol}'")]
    ReservedSymbol {
        /// The offending symbol.
        symbol: String,
    },

    /// A backend call failed mid-operation. Propagated, never swallowed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result type for environment operations.
pub type EnvironmentResult<T> = Result<T, EnvironmentError>;

#[derive(Debug, Default)]
struct EnvState {
    id_counter: u64,
    graph_symbols: BTreeMap<String, Graph>,
    graph_metadata_symbols: BTreeMap<String, GraphMetadata>,
}

/// The persisted namespace of graph and graph-metadata symbols bound to
/// one backend.
///
/// Shared by every session pointed at the same backend; all operations
/// take `&self` and serialize through one internal mutex.
pub struct QueryEnvironment {
    backend: Arc<dyn Backend>,
    base_graph: Graph,
    state: Mutex<EnvState>,
}

impl QueryEnvironment {
    /// Build an environment over a backend and load (creating if absent)
    /// its sentinel record.
    ///
    /// `universe_label` is the backend label every element of the full
    /// provenance universe carries; it becomes the base graph's name.
    pub fn new(
        backend: Arc<dyn Backend>,
        universe_label: impl Into<String>,
    ) -> EnvironmentResult<Self> {
        let environment = Self {
            backend,
            base_graph: Graph::new(universe_label),
            state: Mutex::new(EnvState::default()),
        };
        environment.initialize(false)?;
        Ok(environment)
    }

    /// The reserved symbol the base graph resolves under.
    pub fn base_symbol(&self) -> &'static str {
        BASE_SYMBOL
    }

    /// The base graph denoting the entire universe.
    pub fn base_graph(&self) -> &Graph {
        &self.base_graph
    }

    /// Whether a graph handle is the base graph.
    pub fn is_base_graph(&self, graph: &Graph) -> bool {
        *graph == self.base_graph
    }

    /// Load persisted state from the sentinel record, creating the record
    /// if it does not exist. With `delete_first`, the record and both
    /// symbol maps are wiped before the reload; the ID counter carries
    /// across the reset so generated names are never reissued.
    ///
    /// A missing or non-numeric counter and malformed map entries are
    /// repaired to defaults, logged, and written back; corruption is never
    /// fatal here.
    pub fn initialize(&self, delete_first: bool) -> EnvironmentResult<()> {
        let mut state = self.state.lock();
        self.initialize_locked(&mut state, delete_first)
    }

    /// Full reset: wipe the sentinel, then sweep every backend-resident
    /// generated label, including strays left behind by prior runs.
    pub fn clear(&self) -> EnvironmentResult<()> {
        let mut state = self.state.lock();
        self.initialize_locked(&mut state, true)?;
        self.gc_locked(&state)
    }

    /// Allocate a fresh graph handle under the generated-name prefix.
    ///
    /// The embedded counter is persisted before the handle is returned,
    /// and allocation is serialized against every other mutator, so two
    /// callers can never receive the same name.
    pub fn allocate_graph(&self) -> EnvironmentResult<Graph> {
        Ok(Graph::new(format!(
            "{GRAPH_NAME_PREFIX}{}",
            self.allocate_id()?
        )))
    }

    /// Allocate a fresh graph-metadata handle. Shares the counter with
    /// [`allocate_graph`](Self::allocate_graph).
    pub fn allocate_graph_metadata(&self) -> EnvironmentResult<GraphMetadata> {
        Ok(GraphMetadata::new(format!(
            "{METADATA_NAME_PREFIX}{}",
            self.allocate_id()?
        )))
    }

    /// Resolve a graph symbol. The reserved base symbol always resolves;
    /// anything else is a map lookup, and absence is `None`, not an error.
    pub fn lookup_graph_symbol(&self, symbol: &str) -> Option<Graph> {
        if symbol == BASE_SYMBOL {
            return Some(self.base_graph.clone());
        }
        self.state.lock().graph_symbols.get(symbol).cloned()
    }

    /// Resolve a graph-metadata symbol. Absence is `None`.
    pub fn lookup_graph_metadata_symbol(&self, symbol: &str) -> Option<GraphMetadata> {
        self.state
            .lock()
            .graph_metadata_symbols
            .get(symbol)
            .cloned()
    }

    /// Names of every currently bound graph symbol.
    pub fn graph_symbol_names(&self) -> Vec<String> {
        self.state.lock().graph_symbols.keys().cloned().collect()
    }

    /// Bind a graph to a symbol and persist the updated map.
    ///
    /// Rebinding the reserved base symbol is rejected. Binding a symbol to
    /// the value it already has is a no-op with no persistence write. A
    /// failed persistence write rolls the in-memory binding back and
    /// propagates the backend error.
    pub fn set_graph_symbol(&self, symbol: &str, graph: Graph) -> EnvironmentResult<()> {
        if symbol == BASE_SYMBOL {
            return Err(EnvironmentError::ReservedSymbol {
                symbol: symbol.to_string(),
            });
        }
        let mut state = self.state.lock();
        if state.graph_symbols.get(symbol) == Some(&graph) {
            return Ok(());
        }
        let previous = state.graph_symbols.insert(symbol.to_string(), graph);
        if let Err(e) = self.backend.write_sentinel(&Self::record_of(&state)) {
            match previous {
                Some(previous) => {
                    state.graph_symbols.insert(symbol.to_string(), previous);
                }
                None => {
                    state.graph_symbols.remove(symbol);
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Bind a graph-metadata handle to a symbol. Same rules as
    /// [`set_graph_symbol`](Self::set_graph_symbol).
    pub fn set_graph_metadata_symbol(
        &self,
        symbol: &str,
        metadata: GraphMetadata,
    ) -> EnvironmentResult<()> {
        if symbol == BASE_SYMBOL {
            return Err(EnvironmentError::ReservedSymbol {
                symbol: symbol.to_string(),
            });
        }
        let mut state = self.state.lock();
        if state.graph_metadata_symbols.get(symbol) == Some(&metadata) {
            return Ok(());
        }
        let previous = state
            .graph_metadata_symbols
            .insert(symbol.to_string(), metadata);
        if let Err(e) = self.backend.write_sentinel(&Self::record_of(&state)) {
            match previous {
                Some(previous) => {
                    state
                        .graph_metadata_symbols
                        .insert(symbol.to_string(), previous);
                }
                None => {
                    state.graph_metadata_symbols.remove(symbol);
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove a graph symbol binding and persist the updated map.
    ///
    /// Erasing the reserved base symbol is rejected; a miss is a silent
    /// no-op. Only the binding goes away - the backend-resident labels it
    /// named are reclaimed later by [`gc`](Self::gc).
    pub fn erase_graph_symbol(&self, symbol: &str) -> EnvironmentResult<()> {
        if symbol == BASE_SYMBOL {
            return Err(EnvironmentError::ReservedSymbol {
                symbol: symbol.to_string(),
            });
        }
        let mut state = self.state.lock();
        let Some(previous) = state.graph_symbols.remove(symbol) else {
            return Ok(());
        };
        if let Err(e) = self.backend.write_sentinel(&Self::record_of(&state)) {
            state.graph_symbols.insert(symbol.to_string(), previous);
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove a graph-metadata symbol binding. Same rules as
    /// [`erase_graph_symbol`](Self::erase_graph_symbol).
    pub fn erase_graph_metadata_symbol(&self, symbol: &str) -> EnvironmentResult<()> {
        if symbol == BASE_SYMBOL {
            return Err(EnvironmentError::ReservedSymbol {
                symbol: symbol.to_string(),
            });
        }
        let mut state = self.state.lock();
        let Some(previous) = state.graph_metadata_symbols.remove(symbol) else {
            return Ok(());
        };
        if let Err(e) = self.backend.write_sentinel(&Self::record_of(&state)) {
            state
                .graph_metadata_symbols
                .insert(symbol.to_string(), previous);
            return Err(e.into());
        }
        Ok(())
    }

    /// Mark-and-sweep over backend-resident generated labels.
    ///
    /// Live = names of currently bound graph symbols, the base graph's
    /// name, and the sentinel marker. Candidates = every backend label or
    /// edge symbol under a generated-name prefix. Runs under the
    /// environment mutex so the live set cannot shift mid-sweep.
    pub fn gc(&self) -> EnvironmentResult<()> {
        let state = self.state.lock();
        self.gc_locked(&state)
    }

    fn gc_locked(&self, state: &EnvState) -> EnvironmentResult<()> {
        let mut live: HashSet<&str> = state
            .graph_symbols
            .values()
            .map(|graph| graph.name.as_str())
            .collect();
        live.insert(self.base_graph.name.as_str());
        live.insert(SENTINEL_LABEL);

        let garbage: Vec<String> = self
            .backend
            .vertex_labels()?
            .into_iter()
            .filter(|label| is_generated_name(label) && !live.contains(label.as_str()))
            .collect();
        if !garbage.is_empty() {
            debug!(labels = garbage.len(), "sweeping unreferenced graph labels");
            self.backend.drop_vertex_labels(&garbage)?;
        }

        for symbol in self.backend.edge_symbols()? {
            if is_generated_name(&symbol) && !live.contains(symbol.as_str()) {
                self.backend.strip_edge_symbol(&symbol)?;
            }
        }
        Ok(())
    }

    fn initialize_locked(&self, state: &mut EnvState, delete_first: bool) -> EnvironmentResult<()> {
        if delete_first {
            // The counter survives the reset: it is a high-water mark, and
            // reissuing an erased name would let a stale handle silently
            // resolve to new data.
            let high_water = state.id_counter;
            self.backend.delete_sentinel()?;
            *state = EnvState::default();
            state.id_counter = high_water;
        }

        let record = match self.backend.read_sentinel()? {
            Some(record) => record,
            None => {
                let fresh = SentinelRecord {
                    id_counter: state.id_counter.to_string(),
                    ..SentinelRecord::empty()
                };
                self.backend.write_sentinel(&fresh)?;
                fresh
            }
        };

        let mut repair = false;
        state.id_counter = match record.id_counter.trim().parse::<u64>() {
            Ok(value) => value,
            Err(_) => {
                warn!(
                    raw = %record.id_counter,
                    "sentinel id counter is not numeric; repairing to 0"
                );
                repair = true;
                0
            }
        };

        let (graphs, dropped) = codec::decode_symbol_map(&record.graph_symbols);
        if dropped > 0 {
            warn!(dropped, "dropped malformed graph symbol entries from sentinel");
            repair = true;
        }
        state.graph_symbols = graphs
            .into_iter()
            .map(|(symbol, name)| (symbol, Graph::new(name)))
            .collect();

        let (metadata, dropped) = codec::decode_symbol_map(&record.graph_metadata_symbols);
        if dropped > 0 {
            warn!(
                dropped,
                "dropped malformed graph metadata symbol entries from sentinel"
            );
            repair = true;
        }
        state.graph_metadata_symbols = metadata
            .into_iter()
            .map(|(symbol, name)| (symbol, GraphMetadata::new(name)))
            .collect();

        if repair {
            self.backend.write_sentinel(&Self::record_of(state))?;
        }

        debug!(
            id_counter = state.id_counter,
            graph_symbols = state.graph_symbols.len(),
            graph_metadata_symbols = state.graph_metadata_symbols.len(),
            "query environment loaded"
        );
        Ok(())
    }

    fn allocate_id(&self) -> EnvironmentResult<u64> {
        let mut state = self.state.lock();
        state.id_counter += 1;
        if let Err(e) = self.backend.write_sentinel(&Self::record_of(&state)) {
            state.id_counter -= 1;
            return Err(e.into());
        }
        Ok(state.id_counter)
    }

    fn record_of(state: &EnvState) -> SentinelRecord {
        SentinelRecord {
            id_counter: state.id_counter.to_string(),
            graph_symbols: codec::encode_symbol_map(
                state
                    .graph_symbols
                    .iter()
                    .map(|(symbol, graph)| (symbol.as_str(), graph.name.as_str())),
            ),
            graph_metadata_symbols: codec::encode_symbol_map(
                state
                    .graph_metadata_symbols
                    .iter()
                    .map(|(symbol, metadata)| (symbol.as_str(), metadata.name.as_str())),
            ),
        }
    }
}
