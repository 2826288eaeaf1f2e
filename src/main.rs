//! bz2 worker process - main entry point.
//!
//! Launched by a supervisor with `API_NONCE_FD` naming a writable inherited
//! descriptor. Publishes its socket address on that descriptor, then serves
//! the `bz2` service until SIGTERM or SIGINT.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use bz2_worker::bz2::Bzip2Library;
use bz2_worker::handshake::parse_fd;
use bz2_worker::types::NONCE_FD_ENV;
use bz2_worker::{crash, observability, worker, Config, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Sandboxed bzip2 worker
#[derive(Parser, Debug)]
#[command(name = "bz2-worker", version)]
#[command(about = "Serves libbz2 stream operations over a private Unix socket")]
struct Cli {
    /// Inherited descriptor the endpoint address is published on
    #[arg(long, env = NONCE_FD_ENV)]
    nonce_fd: Option<String>,

    /// JSON configuration file
    #[arg(long, env = "BZ2_WORKER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory the private socket directory is created in
    #[arg(long, env = "BZ2_WORKER_SOCKET_DIR")]
    socket_dir: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, env = "BZ2_WORKER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, env = "BZ2_WORKER_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(fd) = &self.nonce_fd {
            config.server.nonce_fd = Some(parse_fd(fd)?);
        }
        if let Some(dir) = self.socket_dir {
            config.server.socket_dir = Some(dir);
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.observability.json_logs = format == LogFormat::Json;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bz2-worker: {}", e);
            return ExitCode::FAILURE;
        }
    };

    observability::init_tracing(&config.observability);
    crash::install();

    let program = std::env::args().next().unwrap_or_else(|| "bz2-worker".to_string());
    tracing::info!("'{}' program start", program);

    let result = worker::run(config, Arc::new(Bzip2Library::new())).await;
    match result {
        Ok(()) => {
            tracing::info!("'{}' program stop", program);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("'{}' failed: {}", program, e);
            ExitCode::FAILURE
        }
    }
}
