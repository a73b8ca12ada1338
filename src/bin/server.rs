//! `provstore` Server Binary
//!
//! Serves the query session protocol over TCP: one free-text query per
//! line in, one JSON envelope per line out, one session thread per
//! connection. Registers the in-memory reference backend under the name
//! `memory`; production stores are registered by embedding the library.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:9190)
//! cargo run --bin provstore-server
//!
//! # Custom bind address and config file
//! cargo run --bin provstore-server -- --host 0.0.0.0 --port 9999 --config provstore.toml
//! ```

use anyhow::Context;
use clap::Parser;
use provstore::config::LoggingConfig;
use provstore::{Config, MemoryBackend, QueryEnvironment, QuerySession, Registry};
use std::env;
use std::io::BufReader;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Debug, Parser)]
#[command(name = "provstore-server", about = "Provenance audit query server")]
struct Args {
    /// Bind address (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().unwrap_or_else(|_| {
            eprintln!("Using default configuration");
            Config::default()
        }),
    };

    init_tracing(&config.logging);

    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);

    let registry = Arc::new(Registry::new());
    let memory = Arc::new(MemoryBackend::new());
    registry.register("memory", memory.clone());

    // One environment per registered backend hosts the persisted symbol
    // namespace; held for the process lifetime.
    let mut environments = Vec::new();
    let environment = QueryEnvironment::new(memory, &config.environment.universe_label)
        .context("failed to initialize query environment for 'memory'")?;
    if config.environment.gc_on_startup {
        environment
            .gc()
            .context("startup garbage collection failed for 'memory'")?;
    }
    environments.push(Arc::new(environment));

    let listener = TcpListener::bind((host.as_str(), port))
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    info!(%host, port, backends = ?registry.backend_names(), "provstore server listening");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let registry = Arc::clone(&registry);
        let session_config = config.session.clone();
        thread::spawn(move || {
            let peer = stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            let reader = match stream.try_clone() {
                Ok(clone) => BufReader::new(clone),
                Err(e) => {
                    warn!(%peer, error = %e, "failed to clone connection");
                    return;
                }
            };
            let transport = provstore::LineTransport::new(reader, stream);
            let mut session = QuerySession::new(registry, transport, session_config);
            info!(%peer, session = %session.id(), "client connected");
            session.run();
        });
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    // Environment variable takes precedence over the config file value
    let level = env::var("PROVSTORE_LOG").unwrap_or_else(|_| logging.level.clone());
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = logging.format == "json";

    match &logging.file {
        Some(path) => {
            let file = match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(file) => file,
                Err(e) => {
                    eprintln!("ERROR: unable to open log file '{}': {e}", path.display());
                    return;
                }
            };
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = TRACE_GUARD.set(guard);

            let base = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(non_blocking);
            let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
                Box::new(base.json().finish())
            } else {
                Box::new(base.compact().finish())
            };
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        None => {
            let base = tracing_subscriber::fmt().with_env_filter(filter);
            let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
                Box::new(base.json().finish())
            } else {
                Box::new(base.compact().finish())
            };
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }
}
