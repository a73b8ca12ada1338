//! Query session protocol.
//!
//! One session per client connection. The session owns its transport and
//! an optional active backend reference, and loops:
//!
//! ```text
//! CONNECTED -> { AWAIT_QUERY -> DISPATCH -> RESPOND }* -> TERMINATING -> CLOSED
//! ```
//!
//! Per query unit: stamp the receive time, recognize the reserved verbs
//! (`exit`, `quit`, `set storage <name>`, `print storage`,
//! case-insensitive), otherwise re-validate the active backend against the
//! registry and forward the text to its executor. Graph-shaped results run
//! through the registry's transform chain before the envelope is written
//! back.
//!
//! Failure discipline: backend and environment errors become failure
//! envelopes and the loop keeps going; only transport failures end a
//! session. Whatever ends the loop, an active backend is deactivated on
//! the way out.

mod envelope;
mod transport;

pub use envelope::{QueryEnvelope, QueryResult};
pub use transport::{
    channel_pair, ChannelClient, ChannelTransport, LineTransport, QueryTransport, TransportError,
};

use crate::backend::{Backend, Row};
use crate::graph::Graph;
use crate::registry::Registry;
use crate::transform::QueryContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SET_STORAGE_COMMAND: &str = "set storage <storage_name>";

/// Session behavior knobs, loaded from the `[session]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Whether graph-shaped results run through the transform chain.
    #[serde(default = "default_apply_transforms")]
    pub apply_transforms: bool,

    /// Consecutive response-write failures tolerated before the transport
    /// is declared dead and the session terminates.
    #[serde(default = "default_max_write_failures")]
    pub max_write_failures: u32,
}

fn default_apply_transforms() -> bool {
    true
}

fn default_max_write_failures() -> u32 {
    3
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            apply_transforms: default_apply_transforms(),
            max_write_failures: default_max_write_failures(),
        }
    }
}

#[derive(Clone)]
struct ActiveBackend {
    name: String,
    backend: Arc<dyn Backend>,
}

/// One client's query loop and its bound backend reference.
pub struct QuerySession<T: QueryTransport> {
    id: Uuid,
    registry: Arc<Registry>,
    transport: T,
    config: SessionConfig,
    active: Option<ActiveBackend>,
    terminating: bool,
    consecutive_write_failures: u32,
}

impl<T: QueryTransport> QuerySession<T> {
    /// Create a session over a transport, sharing the given registry.
    pub fn new(registry: Arc<Registry>, transport: T, config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            transport,
            config,
            active: None,
            terminating: false,
            consecutive_write_failures: 0,
        }
    }

    /// This session's identifier, as used in log events.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the currently active backend, if one is set.
    pub fn active_storage(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.name.as_str())
    }

    /// Run the protocol loop until the client leaves or the transport
    /// dies. Consumes queries strictly in arrival order.
    pub fn run(&mut self) {
        info!(session = %self.id, "query session connected");

        while !self.terminating {
            let query = match self.transport.read_query() {
                Ok(Some(query)) => query,
                Ok(None) => {
                    // Clean end-of-stream: the transport is already gone,
                    // so there is nothing to respond to.
                    debug!(session = %self.id, "client closed the stream");
                    self.terminating = true;
                    continue;
                }
                Err(e) => {
                    warn!(session = %self.id, error = %e, "failed to read query from client");
                    let mut envelope = QueryEnvelope::received("");
                    envelope.fail("failed to read query from client");
                    self.respond(&envelope);
                    self.terminating = true;
                    continue;
                }
            };

            let mut envelope = QueryEnvelope::received(query.clone());
            let trimmed = query.trim();
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            let lowered: Vec<String> = tokens.iter().map(|t| t.to_ascii_lowercase()).collect();

            match lowered.first().map(String::as_str) {
                Some("exit" | "quit") if lowered.len() == 1 => {
                    envelope.succeed_message("Exiting!");
                    self.respond(&envelope);
                    self.terminating = true;
                }
                Some("set") if lowered.get(1).map(String::as_str) == Some("storage") => {
                    let name = (tokens.len() >= 3).then(|| tokens[2..].join(" "));
                    self.switch_storage(name.as_deref(), &mut envelope);
                    self.respond(&envelope);
                }
                Some("print") if lowered.len() == 2 && lowered[1] == "storage" => {
                    match &self.active {
                        Some(active) => envelope.succeed_message(active.name.clone()),
                        None => envelope.succeed_message("No current storage set"),
                    }
                    self.respond(&envelope);
                }
                _ => {
                    self.dispatch(trimmed, &mut envelope);
                    self.respond(&envelope);
                }
            }
        }

        self.release_backend();
        info!(session = %self.id, "query session closed");
    }

    /// Storage-switch procedure. A failed switch never leaves a stale
    /// active backend behind.
    fn switch_storage(&mut self, name: Option<&str>, envelope: &mut QueryEnvelope) {
        let name = match name.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                envelope.fail(format!(
                    "Missing storage_name in command: '{SET_STORAGE_COMMAND}'."
                ));
                return;
            }
        };

        let Some(backend) = self.registry.resolve(&name) else {
            // The previously active backend (if any) is torn down before
            // the failure is reported.
            self.release_backend();
            envelope.fail(format!("Storage '{name}' not found."));
            return;
        };

        self.release_backend();
        self.active = Some(ActiveBackend {
            name: name.clone(),
            backend: Arc::clone(&backend),
        });
        match backend.activate() {
            Ok(()) => {
                info!(session = %self.id, storage = %name, "storage set for querying");
                envelope.succeed_message(format!(
                    "Storage '{name}' successfully set for querying."
                ));
            }
            Err(e) => {
                error!(session = %self.id, storage = %name, error = %e, "failed to set storage");
                self.active = None;
                envelope.fail(format!(
                    "Failed to set storage '{name}'. Use command: '{SET_STORAGE_COMMAND}'. Error: {e}"
                ));
            }
        }
    }

    /// Ordinary query dispatch: re-validate the active backend, forward
    /// the text, post-process graph-shaped results.
    fn dispatch(&mut self, query: &str, envelope: &mut QueryEnvelope) {
        let Some(active) = self.active.clone() else {
            envelope.fail(format!(
                "No storage set for querying. Use command: '{SET_STORAGE_COMMAND}'."
            ));
            return;
        };

        // The registry is mutable by administrative action outside this
        // session; never trust a previously resolved reference.
        if !self.registry.is_live(&active.backend) {
            self.release_backend();
            envelope.fail(format!(
                "Previously set storage '{}' has been removed. Use command: '{SET_STORAGE_COMMAND}'.",
                active.name
            ));
            return;
        }

        match active.backend.execute_for_rows(query) {
            Ok(rows) => match graph_result(&rows) {
                Some(graph) if self.config.apply_transforms => {
                    let context = QueryContext {
                        query: envelope.query.clone(),
                        received_at: envelope.received_at,
                    };
                    let result = self.run_transforms(graph, &context);
                    envelope.succeed(result);
                }
                Some(graph) => envelope.succeed(QueryResult::Graph { graph }),
                None => envelope.succeed(QueryResult::Rows { rows }),
            },
            Err(e) => {
                warn!(session = %self.id, storage = %active.name, error = %e, "query execution failed");
                envelope.fail(format!("Failed to execute query: {e}"));
            }
        }
    }

    /// Apply the transform chain over one consistent snapshot.
    fn run_transforms(&self, graph: Graph, context: &QueryContext) -> QueryResult {
        let chain = self.registry.transforms();
        let mut current = graph;
        for transform in &chain {
            match transform.apply(&current, context) {
                Ok(Some(next)) => current = next,
                Ok(None) => return QueryResult::Empty,
                Err(e) => {
                    warn!(
                        session = %self.id,
                        transform = transform.name(),
                        error = %e,
                        "transform failed; keeping last good graph"
                    );
                    break;
                }
            }
        }
        QueryResult::Graph { graph: current }
    }

    /// Write one envelope. Write failures are logged, not fatal, until
    /// they repeat past the configured tolerance.
    fn respond(&mut self, envelope: &QueryEnvelope) {
        match self.transport.write_response(envelope) {
            Ok(()) => self.consecutive_write_failures = 0,
            Err(e) => {
                self.consecutive_write_failures += 1;
                warn!(
                    session = %self.id,
                    error = %e,
                    failures = self.consecutive_write_failures,
                    "failed to write response to client"
                );
                if self.consecutive_write_failures >= self.config.max_write_failures {
                    error!(session = %self.id, "transport is unwritable; terminating session");
                    self.terminating = true;
                }
            }
        }
    }

    /// Deactivate and clear the active backend. Teardown errors are
    /// logged only.
    fn release_backend(&mut self) {
        if let Some(active) = self.active.take() {
            if let Err(e) = active.backend.deactivate() {
                error!(
                    session = %self.id,
                    storage = %active.name,
                    error = %e,
                    "failed to shut down querying for storage"
                );
            }
        }
    }
}

/// A result is graph-shaped when the backend answered with exactly one
/// row holding the single column `graph`, whose value names the handle.
fn graph_result(rows: &[Row]) -> Option<Graph> {
    match rows {
        [row] if row.len() == 1 => row.get("graph").map(Graph::new),
        _ => None,
    }
}
