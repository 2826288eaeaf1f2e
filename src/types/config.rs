//! Configuration structures.
//!
//! Configuration is loaded from an optional JSON file, then overridden by
//! command-line flags and environment variables (see `main.rs`).

use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Error, Result};

/// Environment variable naming the inherited side-channel descriptor.
pub const NONCE_FD_ENV: &str = "API_NONCE_FD";

/// Global worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Endpoint and handshake configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// IPC transport configuration.
    #[serde(default)]
    pub ipc: IpcConfig,
}

impl Config {
    /// Load configuration from a JSON file. Missing sections take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::config(format!("invalid config file {}: {}", path.display(), e))
        })
    }
}

/// Endpoint and handshake configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory that receives the private socket directory. `None` means
    /// the system temp dir.
    pub socket_dir: Option<PathBuf>,

    /// Prefix of the generated socket directory name.
    pub socket_prefix: String,

    /// Inherited side-channel descriptor, normally taken from `API_NONCE_FD`.
    /// Never read from a config file.
    #[serde(skip)]
    pub nonce_fd: Option<RawFd>,
}

impl ServerConfig {
    /// Directory the endpoint is created in.
    pub fn socket_parent(&self) -> PathBuf {
        self.socket_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_dir: None,
            socket_prefix: "gsck".to_string(),
            nonce_fd: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error). `RUST_LOG` wins
    /// when set.
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// IPC transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Maximum frame payload size in bytes.
    pub max_frame_bytes: u32,

    /// Maximum concurrent connections. Connections beyond this limit are
    /// dropped on accept.
    pub max_connections: usize,

    /// Connections idle longer than this are dropped. `None` keeps idle
    /// connections open for the lifetime of the worker.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Option<Duration>,

    /// Replies that cannot be written within this window drop the
    /// connection.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 1024 * 1024,
            max_connections: 64,
            idle_timeout: None,
            write_timeout: Duration::from_secs(10),
        }
    }
}
