//! `provstore` Client Binary
//!
//! Interactive query client for the provstore line protocol: sends one
//! query per line, prints each JSON envelope the server answers with.
//!
//! ## Usage
//!
//! ```bash
//! # Connect to a local server
//! cargo run --bin provstore-client
//!
//! # Connect to a remote server
//! cargo run --bin provstore-client -- --host 192.168.1.100 --port 9999
//! ```
//!
//! Reserved verbs understood by the server: `set storage <name>`,
//! `print storage`, `exit`, `quit`. Anything else is forwarded to the
//! active backend.

use anyhow::Context;
use clap::Parser;
use provstore::{QueryEnvelope, QueryResult};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

#[derive(Debug, Parser)]
#[command(name = "provstore-client", about = "Provenance audit query client")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, default_value_t = 9190)]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;
    let mut reader = BufReader::new(stream.try_clone().context("failed to clone connection")?);
    let mut writer = stream;

    println!("provstore client connected to {}:{}", args.host, args.port);
    println!("Commands: set storage <name>, print storage, exit");
    println!();

    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("provstore> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
                writer.flush()?;

                let mut response = String::new();
                if reader.read_line(&mut response)? == 0 {
                    println!("server closed the connection");
                    break;
                }
                print_envelope(&response);

                if matches!(line.to_ascii_lowercase().as_str(), "exit" | "quit") {
                    break;
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }

    Ok(())
}

fn print_envelope(raw: &str) {
    let envelope: QueryEnvelope = match serde_json::from_str(raw.trim()) {
        Ok(envelope) => envelope,
        Err(e) => {
            println!("malformed response ({e}): {}", raw.trim());
            return;
        }
    };

    if !envelope.success {
        println!(
            "error: {}",
            envelope.error.unwrap_or_else(|| "unknown error".to_string())
        );
        return;
    }

    match envelope.result {
        Some(QueryResult::Message { text }) => println!("{text}"),
        Some(QueryResult::Rows { rows }) => {
            for row in &rows {
                let line: Vec<String> = row
                    .columns()
                    .map(|(column, value)| format!("{column}={value}"))
                    .collect();
                println!("{}", line.join("  "));
            }
            println!("{} row(s)", rows.len());
        }
        Some(QueryResult::Graph { graph }) => println!("graph: {graph}"),
        Some(QueryResult::Empty) => println!("(empty result)"),
        None => println!("ok"),
    }
}
