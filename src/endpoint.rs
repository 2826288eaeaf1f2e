//! Private Unix socket endpoint.
//!
//! Each worker gets a freshly created directory (mode 0700, random suffix,
//! exclusive creation) holding a single socket. Names are never reused while
//! a previous worker's directory exists, and a stale socket can never be
//! attached to because the directory itself is new.

use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::types::{Error, Result, ServerConfig};

/// Scheme prefix of published addresses.
pub const ADDRESS_SCHEME: &str = "unix:";

/// File name of the socket inside the private directory.
pub const SOCKET_FILE_NAME: &str = "rpc.sock";

const RANDOM_SUFFIX_LEN: usize = 16;
const PRIVATE_DIR_MODE: u32 = 0o700;

/// Address of a worker endpoint, rendered as `unix:<absolute path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointAddress {
    path: PathBuf,
}

impl EndpointAddress {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse a `unix:` address. Other schemes are rejected.
    pub fn parse(s: &str) -> Result<Self> {
        let path = s
            .strip_prefix(ADDRESS_SCHEME)
            .ok_or_else(|| Error::endpoint(format!("Unsupported address: {}", s)))?;
        if path.is_empty() {
            return Err(Error::endpoint("Empty socket path"));
        }
        Ok(Self::from_path(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ADDRESS_SCHEME, self.path.display())
    }
}

/// A bound, not yet published, endpoint.
#[derive(Debug)]
pub struct Endpoint {
    address: EndpointAddress,
    listener: UnixListener,
    dir: TempDir,
}

impl Endpoint {
    /// Create a private directory under the configured socket dir and bind a
    /// listener inside it. The listener is non-blocking, ready for tokio.
    pub fn bind(config: &ServerConfig) -> Result<Self> {
        let parent = config.socket_parent();
        let dir = tempfile::Builder::new()
            .prefix(&config.socket_prefix)
            .rand_bytes(RANDOM_SUFFIX_LEN)
            .permissions(std::fs::Permissions::from_mode(PRIVATE_DIR_MODE))
            .tempdir_in(&parent)
            .map_err(|e| {
                Error::endpoint(format!(
                    "Cannot create socket directory in {}: {}",
                    parent.display(),
                    e
                ))
            })?;

        let path = dir.path().join(SOCKET_FILE_NAME);
        let listener = UnixListener::bind(&path)
            .map_err(|e| Error::endpoint(format!("Cannot bind {}: {}", path.display(), e)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::endpoint(format!("Cannot configure listener: {}", e)))?;

        let address = EndpointAddress::from_path(path);
        tracing::info!("listening on {}", address);
        Ok(Self {
            address,
            listener,
            dir,
        })
    }

    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// Hand the listener to the server, keeping a guard that removes the
    /// socket directory when dropped.
    pub fn into_listener(self) -> (UnixListener, EndpointGuard) {
        (
            self.listener,
            EndpointGuard {
                address: self.address,
                dir: self.dir,
            },
        )
    }
}

/// Removes the socket and its directory on drop.
#[derive(Debug)]
pub struct EndpointGuard {
    address: EndpointAddress,
    dir: TempDir,
}

impl EndpointGuard {
    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }
}

impl Drop for EndpointGuard {
    fn drop(&mut self) {
        tracing::debug!("removing {}", self.dir.path().display());
    }
}
