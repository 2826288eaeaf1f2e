//! Request and reply types for the `bz2` service.
//!
//! Field names are part of the wire contract with existing clients and must
//! not be renamed. Missing request fields decode as zero, matching proto3
//! defaults; wrongly typed fields are rejected as malformed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StreamLibrary;
use crate::types::{Error, Result};

pub const METHOD_COMPRESS_STREAM: &str = "CompressStream";
pub const METHOD_DECOMPRESS_STREAM: &str = "DecompressStream";
pub const METHOD_TEST_STREAM: &str = "TestStream";
pub const METHOD_LIB_VERSION: &str = "LibVersion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressStreamRequest {
    pub ifd: i32,
    pub ofd: i32,
    pub blocksize100k: i32,
    pub verbosity: i32,
    pub workfactor: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompressStreamRequest {
    pub ifd: i32,
    pub ofd: i32,
    pub verbosity: i32,
    pub small: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestStreamRequest {
    pub ifd: i32,
    pub verbosity: i32,
    pub small: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LibVersionRequest {}

/// Reply shared by the three stream operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamReply {
    pub result: i32,
}

pub type CompressStreamReply = StreamReply;
pub type DecompressStreamReply = StreamReply;
pub type TestStreamReply = StreamReply;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibVersionReply {
    pub version: String,
}

/// One call into the library. The set of operations is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bz2Request {
    CompressStream(CompressStreamRequest),
    DecompressStream(DecompressStreamRequest),
    TestStream(TestStreamRequest),
    LibVersion(LibVersionRequest),
}

/// Result of one library call, mirroring [`Bz2Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bz2Reply {
    CompressStream(CompressStreamReply),
    DecompressStream(DecompressStreamReply),
    TestStream(TestStreamReply),
    LibVersion(LibVersionReply),
}

impl Bz2Request {
    /// Decode a request body for `method`.
    pub fn parse(method: &str, body: Value) -> Result<Self> {
        match method {
            METHOD_COMPRESS_STREAM => Ok(Self::CompressStream(decode_body(method, body)?)),
            METHOD_DECOMPRESS_STREAM => Ok(Self::DecompressStream(decode_body(method, body)?)),
            METHOD_TEST_STREAM => Ok(Self::TestStream(decode_body(method, body)?)),
            METHOD_LIB_VERSION => Ok(Self::LibVersion(decode_body(method, body)?)),
            _ => Err(Error::unimplemented(format!("Unknown bz2 method: {}", method))),
        }
    }

    /// Name of the library entry point the request maps to, used in traces.
    pub fn entry_point(&self) -> &'static str {
        match self {
            Self::CompressStream(_) => "BZ2_bzCompressStream",
            Self::DecompressStream(_) => "BZ2_bzDecompressStream",
            Self::TestStream(_) => "BZ2_bzTestStream",
            Self::LibVersion(_) => "BZ2_bzlibVersion",
        }
    }

    /// Argument list as it appears in call traces.
    pub fn args(&self) -> String {
        match self {
            Self::CompressStream(r) => format!(
                "{}, {}, {}, {}, {}",
                r.ifd, r.ofd, r.blocksize100k, r.verbosity, r.workfactor
            ),
            Self::DecompressStream(r) => {
                format!("{}, {}, {}, {}", r.ifd, r.ofd, r.verbosity, r.small)
            }
            Self::TestStream(r) => format!("{}, {}, {}", r.ifd, r.verbosity, r.small),
            Self::LibVersion(_) => String::new(),
        }
    }

    /// Invoke the matching library entry point exactly once.
    pub fn invoke(self, library: &dyn StreamLibrary) -> Bz2Reply {
        match self {
            Self::CompressStream(r) => Bz2Reply::CompressStream(StreamReply {
                result: library.compress_stream(
                    r.ifd,
                    r.ofd,
                    r.blocksize100k,
                    r.verbosity,
                    r.workfactor,
                ),
            }),
            Self::DecompressStream(r) => Bz2Reply::DecompressStream(StreamReply {
                result: library.decompress_stream(r.ifd, r.ofd, r.verbosity, r.small),
            }),
            Self::TestStream(r) => Bz2Reply::TestStream(StreamReply {
                result: library.test_stream(r.ifd, r.verbosity, r.small),
            }),
            Self::LibVersion(_) => Bz2Reply::LibVersion(LibVersionReply {
                version: library.lib_version(),
            }),
        }
    }
}

impl Bz2Reply {
    /// Rendering of the return value used in call traces.
    pub fn summary(&self) -> String {
        match self {
            Self::CompressStream(r) | Self::DecompressStream(r) | Self::TestStream(r) => {
                r.result.to_string()
            }
            Self::LibVersion(r) => format!("'{}'", r.version),
        }
    }

    /// Encode the reply body for the wire.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::CompressStream(r) | Self::DecompressStream(r) | Self::TestStream(r) => {
                serde_json::to_value(r)?
            }
            Self::LibVersion(r) => serde_json::to_value(r)?,
        };
        Ok(value)
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(method: &str, body: Value) -> Result<T> {
    // Clients may omit the body entirely for parameterless calls.
    let body = if body.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        body
    };
    serde_json::from_value(body)
        .map_err(|e| Error::malformed(format!("Invalid {} request: {}", method, e)))
}
