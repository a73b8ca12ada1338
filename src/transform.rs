//! Post-query graph transforms.
//!
//! After a dispatch produces a graph-shaped result, the session runs it
//! through the registry's transform chain in registration order. A
//! transform may replace the graph, drop it (short-circuiting the rest of
//! the chain), or fail - failure is logged by the session and treated as a
//! pass-through, keeping the last good graph.

use crate::graph::Graph;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Context handed to each transform alongside the graph.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// The raw query text that produced the graph.
    pub query: String,
    /// When the server received the query.
    pub received_at: DateTime<Utc>,
}

/// A transform application failure. The chain stops and the last good
/// graph stands.
#[derive(Debug, Clone, Error)]
#[error("transform failed: {message}")]
pub struct TransformError {
    /// What went wrong, in the transform's own words.
    pub message: String,
}

impl TransformError {
    /// Create an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One link in the post-query transform chain.
pub trait Transform: Send + Sync {
    /// A short name used in log events.
    fn name(&self) -> &str;

    /// Apply to the current graph. `Ok(Some)` replaces it, `Ok(None)`
    /// short-circuits the remaining chain and becomes the final (empty)
    /// result.
    fn apply(&self, graph: &Graph, context: &QueryContext) -> Result<Option<Graph>, TransformError>;
}
