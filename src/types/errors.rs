//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Startup
//! variants end the process; request variants are reported to the caller in
//! an IPC error frame.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the worker.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid startup configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Side-channel handshake failed (short or failed write).
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Endpoint could not be created or bound.
    #[error("endpoint error: {0}")]
    Endpoint(String),

    /// Request could not be decoded (map to INTERNAL, as gRPC does for
    /// unparseable messages).
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Unknown service or method (map to UNIMPLEMENTED).
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Server is draining and refuses new work (map to UNAVAILABLE).
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Internal errors (map to INTERNAL).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Status code string carried in IPC error frames.
    pub fn to_ipc_error_code(&self) -> &'static str {
        match self {
            Error::Unimplemented(_) => "UNIMPLEMENTED",
            Error::Unavailable(_) => "UNAVAILABLE",
            Error::Malformed(_)
            | Error::Internal(_)
            | Error::Serialization(_)
            | Error::Io(_) => "INTERNAL",
            Error::Config(_) | Error::Handshake(_) | Error::Endpoint(_) => "FAILED_PRECONDITION",
        }
    }

    /// Rebuild an error from the code and message of an IPC error frame.
    pub fn from_ipc_error(code: &str, message: String) -> Self {
        match code {
            "UNIMPLEMENTED" => Error::Unimplemented(message),
            "UNAVAILABLE" => Error::Unavailable(message),
            _ => Error::Internal(format!("{}: {}", code, message)),
        }
    }

    /// Whether this error can only happen before the worker serves requests.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Handshake(_) | Error::Endpoint(_)
        )
    }
}

// Convenience constructors
impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::Handshake(msg.into())
    }

    pub fn endpoint(msg: impl Into<String>) -> Self {
        Self::Endpoint(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Self::Unimplemented(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
