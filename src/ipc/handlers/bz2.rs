//! bz2 service handler: stream compression pass-through.

use serde_json::Value;

use crate::bz2::{Bz2Request, Bz2Service};
use crate::types::Result;

pub const SERVICE_NAME: &str = "bz2";

pub async fn handle(service: &Bz2Service, method: &str, body: Value) -> Result<Value> {
    let request = Bz2Request::parse(method, body)?;
    let reply = service.call(request).await?;
    reply.to_value()
}
