//! Side-channel handshake.
//!
//! Wire format on the inherited descriptor:
//! ```text
//! ┌──────────────┬──────────────────────────────────┐
//! │ L (4B)       │ address bytes, NUL-terminated    │
//! │ u32 native   │ L bytes, NUL included            │
//! └──────────────┴──────────────────────────────────┘
//! ```
//! Each part is written with a single `write`. The channel has no flow
//! control and is used exactly once, so a short write aborts startup instead
//! of being resumed.

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use crate::endpoint::EndpointAddress;
use crate::types::{Error, Result, NONCE_FD_ENV};

/// Upper bound on the announced length accepted by [`read_address`].
pub const MAX_ADDRESS_LEN: u32 = 4096;

/// Encode the address payload: the address text plus a trailing NUL.
pub fn encode_address(address: &EndpointAddress) -> Vec<u8> {
    let mut payload = address.to_string().into_bytes();
    payload.push(0);
    payload
}

/// Write the length prefix and the address to `sink`.
pub fn publish<W: Write>(sink: &mut W, address: &EndpointAddress) -> Result<()> {
    let payload = encode_address(address);
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::handshake(format!("Address too long: {} bytes", payload.len())))?;

    write_once(sink, &len.to_ne_bytes(), "length prefix")?;
    write_once(sink, &payload, "address")?;
    Ok(())
}

fn write_once<W: Write>(sink: &mut W, buf: &[u8], what: &str) -> Result<()> {
    loop {
        match sink.write(buf) {
            Ok(n) if n == buf.len() => return Ok(()),
            Ok(n) => {
                return Err(Error::handshake(format!(
                    "Short write of {}: {} of {} bytes",
                    what,
                    n,
                    buf.len()
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::handshake(format!("Writing {} failed: {}", what, e))),
        }
    }
}

/// Supervisor side: read one announced address from `reader`.
pub fn read_address<R: Read>(reader: &mut R) -> Result<EndpointAddress> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .map_err(|e| Error::handshake(format!("Reading length prefix failed: {}", e)))?;
    let len = u32::from_ne_bytes(len_buf);
    if len < 2 || len > MAX_ADDRESS_LEN {
        return Err(Error::handshake(format!("Invalid address length: {}", len)));
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .map_err(|e| Error::handshake(format!("Reading address failed: {}", e)))?;
    if payload.pop() != Some(0) {
        return Err(Error::handshake("Address is not NUL-terminated"));
    }
    let text = String::from_utf8(payload)
        .map_err(|e| Error::handshake(format!("Address is not UTF-8: {}", e)))?;
    EndpointAddress::parse(&text)
}

/// The inherited write-only descriptor used to announce the endpoint.
#[derive(Debug)]
pub struct SideChannel {
    file: File,
}

/// Parse a descriptor number as it appears in `API_NONCE_FD`.
pub fn parse_fd(value: &str) -> Result<RawFd> {
    value
        .trim()
        .parse::<RawFd>()
        .map_err(|_| Error::config(format!("{} is not a descriptor: {:?}", NONCE_FD_ENV, value)))
}

impl SideChannel {
    /// Take the descriptor named by `API_NONCE_FD`.
    pub fn from_env() -> Result<Self> {
        let value = std::env::var(NONCE_FD_ENV)
            .map_err(|_| Error::config(format!("{} is not set", NONCE_FD_ENV)))?;
        Self::from_raw(parse_fd(&value)?)
    }

    /// Take ownership of inherited descriptor `fd`.
    ///
    /// The descriptor must be open and writable. From here on the channel
    /// owns it and closes it when published or dropped.
    #[allow(unsafe_code)]
    pub fn from_raw(fd: RawFd) -> Result<Self> {
        if fd < 0 {
            return Err(Error::config(format!("{} is negative: {}", NONCE_FD_ENV, fd)));
        }
        let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| {
            Error::config(format!("{}={} is not an open descriptor: {}", NONCE_FD_ENV, fd, e))
        })?;
        if OFlag::from_bits_truncate(flags) & OFlag::O_ACCMODE == OFlag::O_RDONLY {
            return Err(Error::config(format!(
                "{}={} is not writable",
                NONCE_FD_ENV, fd
            )));
        }
        // SAFETY: the descriptor is open (F_GETFL succeeded) and was handed
        // to this process for exclusive use by its launcher.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            file: File::from(owned),
        })
    }

    /// Announce `address` and close the descriptor.
    pub fn publish(mut self, address: &EndpointAddress) -> Result<()> {
        publish(&mut self.file, address)?;
        drop(self);
        tracing::debug!("side channel closed");
        Ok(())
    }
}
