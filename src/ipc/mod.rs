//! Unix socket + msgpack IPC transport layer.
//!
//! Length-prefixed msgpack framing over the worker's private Unix socket,
//! carrying `{id, service, method, body}` requests.

pub mod client;
pub mod codec;
pub mod handlers;
pub mod router;
pub mod server;

pub use client::IpcClient;
pub use server::IpcServer;
