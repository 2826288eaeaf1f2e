//! Core types for the worker.
//!
//! - **Errors**: application error type with thiserror derives
//! - **Config**: configuration structures for endpoint, observability and IPC

mod config;
mod errors;

pub use config::{Config, IpcConfig, ObservabilityConfig, ServerConfig, NONCE_FD_ENV};
pub use errors::{Error, Result};
