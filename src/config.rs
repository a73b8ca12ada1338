//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - provstore.toml (default configuration)
//! - provstore.local.toml (git-ignored local overrides)
//! - Environment variables (PROVSTORE_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # provstore.toml
//! [server]
//! host = "0.0.0.0"
//! port = 9190
//!
//! [environment]
//! universe_label = "provenance"
//!
//! [session]
//! apply_transforms = true
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! PROVSTORE_SERVER__PORT=9999
//! PROVSTORE_LOGGING__LEVEL=debug
//! ```

use crate::session::SessionConfig;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the query line protocol
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port for the query line protocol
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Query environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Backend label carried by every element of the full provenance
    /// universe; becomes the base graph's name
    #[serde(default = "default_universe_label")]
    pub universe_label: String,

    /// Run a garbage-collection sweep over each registered backend at
    /// server startup, reclaiming strays left by prior runs
    #[serde(default = "default_true")]
    pub gc_on_startup: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file path; logs go to stderr when unset
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9190
}

fn default_universe_label() -> String {
    "provenance".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            universe_label: default_universe_label(),
            gc_on_startup: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            environment: EnvironmentConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with hierarchical overrides
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("provstore.toml"))
            .merge(Toml::file("provstore.local.toml"))
            .merge(Env::prefixed("PROVSTORE_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PROVSTORE_").split("__"))
            .extract()
    }
}
