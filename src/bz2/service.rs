//! Bz2Service: pass-through dispatcher over a [`StreamLibrary`].

use std::fmt;
use std::sync::Arc;

use super::{Bz2Reply, Bz2Request, StreamLibrary};
use crate::types::{Error, Result};

/// Forwards each request to the library on tokio's blocking pool.
///
/// The service holds no per-request state; clones share the same library.
#[derive(Clone)]
pub struct Bz2Service {
    library: Arc<dyn StreamLibrary>,
}

impl fmt::Debug for Bz2Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bz2Service").finish_non_exhaustive()
    }
}

impl Bz2Service {
    pub fn new(library: Arc<dyn StreamLibrary>) -> Self {
        Self { library }
    }

    /// Invoke the library entry point for `request` exactly once.
    ///
    /// Library result codes come back inside `Ok`; only a failure of the
    /// blocking task itself is an `Err`.
    pub async fn call(&self, request: Bz2Request) -> Result<Bz2Reply> {
        let entry_point = request.entry_point();
        let args = request.args();
        tracing::info!("=> {}({})", entry_point, args);

        let library = Arc::clone(&self.library);
        let reply = tokio::task::spawn_blocking(move || request.invoke(library.as_ref()))
            .await
            .map_err(|e| {
                tracing::error!("{}({}) did not return: {}", entry_point, args, e);
                Error::internal(format!("{} failed: {}", entry_point, e))
            })?;

        tracing::info!("<= {}({}) return {}", entry_point, args, reply.summary());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bz2::messages::{
        CompressStreamRequest, DecompressStreamRequest, LibVersionReply, LibVersionRequest,
        StreamReply, TestStreamRequest,
    };
    use crate::bz2::MockStreamLibrary;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_compress_passes_arguments_and_result_through() {
        let mut library = MockStreamLibrary::new();
        library
            .expect_compress_stream()
            .with(eq(5), eq(6), eq(77), eq(-3), eq(1000))
            .times(1)
            .return_const(-2);
        let service = Bz2Service::new(Arc::new(library));

        let reply = service
            .call(Bz2Request::CompressStream(CompressStreamRequest {
                ifd: 5,
                ofd: 6,
                blocksize100k: 77,
                verbosity: -3,
                workfactor: 1000,
            }))
            .await
            .unwrap();
        assert_eq!(reply, Bz2Reply::CompressStream(StreamReply { result: -2 }));
    }

    #[tokio::test]
    async fn test_decompress_and_test_stream_dispatch() {
        let mut library = MockStreamLibrary::new();
        library
            .expect_decompress_stream()
            .with(eq(3), eq(4), eq(2), eq(1))
            .times(1)
            .return_const(0);
        library
            .expect_test_stream()
            .with(eq(9), eq(0), eq(7))
            .times(1)
            .return_const(-4);
        let service = Bz2Service::new(Arc::new(library));

        let reply = service
            .call(Bz2Request::DecompressStream(DecompressStreamRequest {
                ifd: 3,
                ofd: 4,
                verbosity: 2,
                small: 1,
            }))
            .await
            .unwrap();
        assert_eq!(reply, Bz2Reply::DecompressStream(StreamReply { result: 0 }));

        let reply = service
            .call(Bz2Request::TestStream(TestStreamRequest {
                ifd: 9,
                verbosity: 0,
                small: 7,
            }))
            .await
            .unwrap();
        assert_eq!(reply, Bz2Reply::TestStream(StreamReply { result: -4 }));
    }

    #[tokio::test]
    async fn test_lib_version() {
        let mut library = MockStreamLibrary::new();
        library
            .expect_lib_version()
            .times(2)
            .returning(|| "1.0.8, 13-Jul-2019".to_string());
        let service = Bz2Service::new(Arc::new(library));

        for _ in 0..2 {
            let reply = service
                .call(Bz2Request::LibVersion(LibVersionRequest {}))
                .await
                .unwrap();
            assert_eq!(
                reply,
                Bz2Reply::LibVersion(LibVersionReply {
                    version: "1.0.8, 13-Jul-2019".to_string()
                })
            );
        }
    }

    #[tokio::test]
    async fn test_library_panic_is_internal_error() {
        let mut library = MockStreamLibrary::new();
        library
            .expect_test_stream()
            .returning(|_, _, _| panic!("library blew up"));
        let service = Bz2Service::new(Arc::new(library));

        let err = service
            .call(Bz2Request::TestStream(TestStreamRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.to_ipc_error_code(), "INTERNAL");
    }
}
