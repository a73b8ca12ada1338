//! Response envelope types.
//!
//! Every query a session reads is answered with one [`QueryEnvelope`]:
//! the raw query text, the server-receive timestamp, a success flag, and
//! either a result payload or an error message. Envelopes ride the wire as
//! one JSON object per line.

use crate::backend::Row;
use crate::graph::Graph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A query result payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResult {
    /// A plain status message (reserved verbs answer with these).
    Message {
        /// The message text.
        text: String,
    },
    /// A materialized row set.
    Rows {
        /// The rows, in backend order.
        rows: Vec<Row>,
    },
    /// A graph handle, after transform-chain application.
    Graph {
        /// The resulting graph.
        graph: Graph,
    },
    /// The transform chain dropped the graph.
    Empty,
}

/// One query/response exchange with a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEnvelope {
    /// The raw query text as received.
    pub query: String,
    /// When the server received the query.
    pub received_at: DateTime<Utc>,
    /// Whether the query succeeded.
    pub success: bool,
    /// The result payload, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryResult>,
    /// The error message, present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryEnvelope {
    /// Stamp a newly received query. Starts unresolved (not successful,
    /// no payload).
    pub fn received(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            received_at: Utc::now(),
            success: false,
            result: None,
            error: None,
        }
    }

    /// Resolve as successful with the given payload.
    pub fn succeed(&mut self, result: QueryResult) {
        self.success = true;
        self.result = Some(result);
        self.error = None;
    }

    /// Resolve as successful with a plain message payload.
    pub fn succeed_message(&mut self, text: impl Into<String>) {
        self.succeed(QueryResult::Message { text: text.into() });
    }

    /// Resolve as failed with an error message.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.success = false;
        self.result = None;
        self.error = Some(message.into());
    }
}
