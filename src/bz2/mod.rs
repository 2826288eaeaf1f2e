//! bzip2 stream operations exposed by the worker.
//!
//! - **StreamLibrary**: the seam to the external compression library
//! - **messages**: typed requests and replies, wire field names included
//! - **library**: the libbz2-backed implementation
//! - **service**: the dispatcher that forwards requests to the library

pub mod library;
pub mod messages;
pub mod service;

pub use library::Bzip2Library;
pub use messages::{Bz2Reply, Bz2Request};
pub use service::Bz2Service;

/// libbz2 result codes.
pub mod codes {
    pub const BZ_OK: i32 = 0;
    pub const BZ_SEQUENCE_ERROR: i32 = -1;
    pub const BZ_PARAM_ERROR: i32 = -2;
    pub const BZ_MEM_ERROR: i32 = -3;
    pub const BZ_DATA_ERROR: i32 = -4;
    pub const BZ_DATA_ERROR_MAGIC: i32 = -5;
    pub const BZ_IO_ERROR: i32 = -6;
    pub const BZ_UNEXPECTED_EOF: i32 = -7;
}

/// Entry points of the external stream library.
///
/// Every method is synchronous and may block for as long as the descriptors
/// it is handed take to drain. Failures are reported through the returned
/// result code, never through a Rust error: the worker passes the code back
/// to its caller untouched.
#[cfg_attr(test, mockall::automock)]
pub trait StreamLibrary: Send + Sync {
    /// Compress everything readable from `ifd` into `ofd`.
    fn compress_stream(
        &self,
        ifd: i32,
        ofd: i32,
        block_size_100k: i32,
        verbosity: i32,
        work_factor: i32,
    ) -> i32;

    /// Decompress everything readable from `ifd` into `ofd`.
    fn decompress_stream(&self, ifd: i32, ofd: i32, verbosity: i32, small: i32) -> i32;

    /// Check the integrity of the compressed data readable from `ifd`.
    fn test_stream(&self, ifd: i32, verbosity: i32, small: i32) -> i32;

    /// Library version string.
    fn lib_version(&self) -> String;
}
