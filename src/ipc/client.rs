//! Minimal request client for supervisors and tests.
//!
//! One call in flight per client; open more clients for concurrency.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::UnixStream;

use crate::bz2::messages::{
    CompressStreamRequest, DecompressStreamRequest, LibVersionReply, StreamReply,
    TestStreamRequest, METHOD_COMPRESS_STREAM, METHOD_DECOMPRESS_STREAM, METHOD_LIB_VERSION,
    METHOD_TEST_STREAM,
};
use crate::endpoint::EndpointAddress;
use crate::ipc::codec::{encode_payload, read_frame, write_frame, MSG_ERROR, MSG_REQUEST, MSG_RESPONSE};
use crate::ipc::handlers::bz2::SERVICE_NAME;
use crate::types::{Error, IpcConfig, Result};

#[derive(Debug)]
pub struct IpcClient {
    stream: UnixStream,
    max_frame_bytes: u32,
}

impl IpcClient {
    pub async fn connect(address: &EndpointAddress) -> Result<Self> {
        let stream = UnixStream::connect(address.path()).await?;
        Ok(Self {
            stream,
            max_frame_bytes: IpcConfig::default().max_frame_bytes,
        })
    }

    /// Send one request and wait for its reply body.
    pub async fn call(&mut self, service: &str, method: &str, body: Value) -> Result<Value> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let request = serde_json::json!({
            "id": id,
            "service": service,
            "method": method,
            "body": body,
        });
        write_frame(&mut self.stream, MSG_REQUEST, &encode_payload(&request)?).await?;

        let (msg_type, payload) = read_frame(&mut self.stream, self.max_frame_bytes)
            .await?
            .ok_or_else(|| Error::unavailable("connection closed before reply"))?;
        let response: Value = rmp_serde::from_slice(&payload)
            .map_err(|e| Error::malformed(format!("Invalid reply: {}", e)))?;

        match msg_type {
            MSG_RESPONSE => {
                let reply_id = response.get("id").and_then(Value::as_str).unwrap_or("");
                if reply_id != id {
                    return Err(Error::internal(format!(
                        "Reply id mismatch: sent {}, got {}",
                        id, reply_id
                    )));
                }
                Ok(response.get("body").cloned().unwrap_or(Value::Null))
            }
            MSG_ERROR => {
                let error = response.get("error").cloned().unwrap_or(Value::Null);
                let code = error.get("code").and_then(Value::as_str).unwrap_or("");
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                Err(Error::from_ipc_error(code, message))
            }
            other => Err(Error::malformed(format!(
                "Unexpected message type: 0x{:02X}",
                other
            ))),
        }
    }

    async fn call_typed<T: DeserializeOwned>(&mut self, method: &str, body: Value) -> Result<T> {
        let value = self.call(SERVICE_NAME, method, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn compress_stream(&mut self, request: CompressStreamRequest) -> Result<i32> {
        let reply: StreamReply = self
            .call_typed(METHOD_COMPRESS_STREAM, serde_json::to_value(request)?)
            .await?;
        Ok(reply.result)
    }

    pub async fn decompress_stream(&mut self, request: DecompressStreamRequest) -> Result<i32> {
        let reply: StreamReply = self
            .call_typed(METHOD_DECOMPRESS_STREAM, serde_json::to_value(request)?)
            .await?;
        Ok(reply.result)
    }

    pub async fn test_stream(&mut self, request: TestStreamRequest) -> Result<i32> {
        let reply: StreamReply = self
            .call_typed(METHOD_TEST_STREAM, serde_json::to_value(request)?)
            .await?;
        Ok(reply.result)
    }

    pub async fn lib_version(&mut self) -> Result<String> {
        let reply: LibVersionReply = self
            .call_typed(METHOD_LIB_VERSION, serde_json::json!({}))
            .await?;
        Ok(reply.version)
    }
}
