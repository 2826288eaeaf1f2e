//! Top-level IPC router: decodes the request envelope, routes by service,
//! delegates to handlers.

use serde::Deserialize;
use serde_json::Value;

use crate::bz2::Bz2Service;
use crate::ipc::handlers;
use crate::types::{Error, Result};

/// Request envelope carried in every `MSG_REQUEST` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub body: Value,
}

impl RequestEnvelope {
    /// Decode an envelope from a msgpack payload.
    ///
    /// On failure the error is paired with whatever request id could be
    /// recovered, so the caller can still address the error reply.
    pub fn decode(payload: &[u8]) -> std::result::Result<Self, (String, Error)> {
        let raw: Value = rmp_serde::from_slice(payload)
            .map_err(|e| (String::new(), Error::malformed(format!("Invalid msgpack: {}", e))))?;
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        serde_json::from_value(raw)
            .map_err(|e| (id, Error::malformed(format!("Invalid request envelope: {}", e))))
    }
}

/// Route an IPC request to the appropriate service handler.
pub async fn route_request(
    service: &Bz2Service,
    service_name: &str,
    method: &str,
    body: Value,
) -> Result<Value> {
    match service_name {
        handlers::bz2::SERVICE_NAME => handlers::bz2::handle(service, method, body).await,
        _ => Err(Error::unimplemented(format!("Unknown service: {}", service_name))),
    }
}
