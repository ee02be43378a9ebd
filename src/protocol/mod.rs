//! Wire protocol for requests and replies.
//!
//! Both message kinds travel as JSON arrays with a fixed field order:
//!
//! - request: `[reply_channel, request_id, name, expiry_ms, context_data, payload]`
//! - reply: `[request_id, error_or_null, data?]`
//!
//! Decoding validates arity and field types up front and reports any
//! mismatch as [`RpcError::Decode`](crate::RpcError::Decode), so callers
//! never see a partially populated message.

mod remote_error;
mod reply;
mod request;

pub use remote_error::RemoteError;
pub use reply::ReplyMessage;
pub use request::RequestMessage;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    // ---
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn parse_array(bytes: &[u8]) -> crate::Result<Vec<serde_json::Value>> {
    // ---
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|err| crate::RpcError::Decode(format!("invalid JSON: {err}")))?;

    match value {
        serde_json::Value::Array(fields) => Ok(fields),
        other => Err(crate::RpcError::Decode(format!(
            "expected a JSON array, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    // ---
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
