//! Session transports.
//!
//! The session loop is transport-agnostic: it reads query units and
//! writes envelopes through [`QueryTransport`]. A clean end-of-stream is
//! `Ok(None)` - the client hung up, no more responses can be delivered.
//! Only transport errors ever terminate a session.
//!
//! Two implementations ship here: [`LineTransport`] speaks
//! newline-delimited text in / JSON envelopes out over any `Read`/`Write`
//! pair (the TCP server uses it), and [`channel_pair`] builds an
//! in-process pair for tests and embedders.

use super::envelope::QueryEnvelope;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io::{BufRead, Write};
use thiserror::Error;

/// Transport failures. The only error family that can end a session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The client connection became unreadable.
    #[error("failed to read from client: {0}")]
    Read(String),

    /// The client connection became unwritable.
    #[error("failed to write to client: {0}")]
    Write(String),

    /// The response envelope could not be encoded.
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Blocking transport for one client connection.
pub trait QueryTransport {
    /// Block until the next query unit arrives. `Ok(None)` is a clean
    /// end-of-stream.
    fn read_query(&mut self) -> Result<Option<String>, TransportError>;

    /// Deliver one response envelope to the client.
    fn write_response(&mut self, envelope: &QueryEnvelope) -> Result<(), TransportError>;
}

/// Newline-delimited transport: one query per input line, one JSON
/// envelope per output line. Blank input lines are skipped.
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> LineTransport<R, W> {
    /// Wrap a reader/writer pair.
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R: BufRead, W: Write> QueryTransport for LineTransport<R, W> {
    fn read_query(&mut self) -> Result<Option<String>, TransportError> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| TransportError::Read(e.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    fn write_response(&mut self, envelope: &QueryEnvelope) -> Result<(), TransportError> {
        let encoded = serde_json::to_string(envelope)?;
        self.writer
            .write_all(encoded.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush())
            .map_err(|e| TransportError::Write(e.to_string()))
    }
}

/// Server half of an in-process transport pair.
pub struct ChannelTransport {
    queries: Receiver<String>,
    responses: Sender<QueryEnvelope>,
}

impl QueryTransport for ChannelTransport {
    fn read_query(&mut self) -> Result<Option<String>, TransportError> {
        // A disconnected sender is the client hanging up cleanly.
        Ok(self.queries.recv().ok())
    }

    fn write_response(&mut self, envelope: &QueryEnvelope) -> Result<(), TransportError> {
        self.responses
            .send(envelope.clone())
            .map_err(|_| TransportError::Write("client receiver dropped".to_string()))
    }
}

/// Client half of an in-process transport pair. Dropping it closes the
/// stream, which the session sees as a clean end-of-stream.
pub struct ChannelClient {
    queries: Sender<String>,
    responses: Receiver<QueryEnvelope>,
}

impl ChannelClient {
    /// Send one query to the session.
    pub fn send(&self, query: impl Into<String>) -> Result<(), TransportError> {
        self.queries
            .send(query.into())
            .map_err(|_| TransportError::Write("session ended".to_string()))
    }

    /// Block for the next response envelope. `None` once the session has
    /// closed and drained.
    pub fn recv(&self) -> Option<QueryEnvelope> {
        self.responses.recv().ok()
    }
}

/// Build a connected in-process transport pair.
pub fn channel_pair() -> (ChannelTransport, ChannelClient) {
    let (query_tx, query_rx) = unbounded();
    let (response_tx, response_rx) = unbounded();
    (
        ChannelTransport {
            queries: query_rx,
            responses: response_tx,
        },
        ChannelClient {
            queries: query_tx,
            responses: response_rx,
        },
    )
}
