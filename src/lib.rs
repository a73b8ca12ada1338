//! # provstore - Provenance-Graph Audit Store
//!
//! Client sessions issue queries against a named "universe" graph
//! materialized in a pluggable backing store, with graph-shaped results
//! post-processed by an ordered transform chain. This crate is the
//! namespace and session machinery any query language's evaluator plugs
//! into - it deliberately defines no query language of its own.
//!
//! ## Architecture
//!
//! ```text
//! client
//!   |  one free-text query line per request
//!   v
//! QuerySession ----resolve/is_live----> Registry
//!   |                                     |- named Backends
//!   |  execute_for_rows                   |- ordered Transform chain
//!   v                                     |
//! Backend <---- QueryEnvironment          |
//!   ^            (symbol tables,          |
//!   |             ID allocation, GC)      |
//!   +---- transform chain applied <-------+
//!   |
//!   v
//! client <- QueryEnvelope {query, received_at, success, result | error}
//! ```
//!
//! ## Subsystems
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`environment`] | Persisted graph-symbol namespace, ID allocation, mark-and-sweep GC |
//! | [`session`] | Per-client protocol loop: storage hot-swap, dispatch, transforms |
//! | [`backend`] | Pluggable store trait plus the in-memory reference backend |
//! | [`registry`] | Process-wide named backends and the transform chain |
//! | [`transform`] | Post-query graph transform seam |
//! | [`config`] | Hierarchical figment configuration |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use provstore::{MemoryBackend, QueryEnvironment, Registry};
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let registry = Arc::new(Registry::new());
//! registry.register("memory", backend.clone());
//!
//! let environment = QueryEnvironment::new(backend, "provenance")?;
//! let graph = environment.allocate_graph()?;
//! environment.set_graph_symbol("$mine", graph)?;
//! environment.gc()?;
//! # Ok::<(), provstore::EnvironmentError>(())
//! ```
//!
//! Sessions are driven by the bundled server binary (one thread per TCP
//! connection) or embedded directly over an in-process transport:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use provstore::{channel_pair, QuerySession, Registry, SessionConfig};
//!
//! let registry = Arc::new(Registry::new());
//! let (transport, client) = channel_pair();
//! std::thread::spawn(move || {
//!     QuerySession::new(registry, transport, SessionConfig::default()).run();
//! });
//! client.send("print storage").unwrap();
//! let response = client.recv().unwrap();
//! assert!(response.success);
//! ```

pub mod backend;
pub mod config;
pub mod environment;
pub mod graph;
pub mod registry;
pub mod session;
pub mod transform;

pub use backend::{Backend, BackendError, BackendResult, MemoryBackend, Row, SentinelRecord};
pub use config::{Config, EnvironmentConfig, LoggingConfig, ServerConfig};
pub use environment::{
    is_generated_name, EnvironmentError, EnvironmentResult, QueryEnvironment, BASE_SYMBOL,
    GRAPH_NAME_PREFIX, METADATA_NAME_PREFIX, SENTINEL_LABEL,
};
pub use graph::{Graph, GraphMetadata};
pub use registry::Registry;
pub use session::{
    channel_pair, ChannelClient, ChannelTransport, LineTransport, QueryEnvelope, QueryResult,
    QuerySession, QueryTransport, SessionConfig, TransportError,
};
pub use transform::{QueryContext, Transform, TransformError};
