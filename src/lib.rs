//! # bz2-worker - Sandboxed bzip2 compression worker
//!
//! A short-lived child process that exposes the libbz2 stream entry points
//! over a private Unix socket:
//! - Publishes its endpoint address to the parent over an inherited descriptor
//! - Serves `bz2.CompressStream`, `DecompressStream`, `TestStream` and
//!   `LibVersion` concurrently, one library call per request
//! - Drains in-flight requests on SIGTERM/SIGINT before exiting
//! - Dumps a backtrace to stderr on fatal signals
//!
//! ## Architecture
//!
//! ```text
//!   parent ──API_NONCE_FD──▶ handshake ──"unix:/tmp/gsckXXXX/rpc.sock"──▶ parent
//!
//!                    ┌─────────────────────────────────┐
//!   IPC requests  →  │          IpcServer              │
//!                    │  ┌─────────┐   ┌──────────┐     │
//!                    │  │ router  │ → │Bz2Service│ ──▶ spawn_blocking(libbz2)
//!                    │  └─────────┘   └──────────┘     │
//!                    └─────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod bz2;
pub mod crash;
pub mod endpoint;
pub mod handshake;
pub mod ipc;
pub mod types;
pub mod worker;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
