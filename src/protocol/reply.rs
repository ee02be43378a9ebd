use bytes::Bytes;
use serde_json::Value;

use super::{json_kind, parse_array};
use crate::{RemoteError, RequestId, Result, RpcError};

/// A reply as it travels over the bus.
///
/// Encoded positionally as `[request_id, error_or_null, data?]`. The data
/// slot is left out entirely when `data` is `None`, so "no result" and an
/// explicit `null` result survive the round trip as different values.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyMessage {
    pub request_id: RequestId,
    pub error: Option<RemoteError>,
    pub data: Option<Value>,
}

impl ReplyMessage {
    // ---

    /// Successful reply; `data` of `None` means the handler produced nothing.
    pub fn success(request_id: RequestId, data: Option<Value>) -> Self {
        Self {
            request_id,
            error: None,
            data,
        }
    }

    /// Failed reply. Never carries data.
    pub fn failure(request_id: RequestId, error: RemoteError) -> Self {
        Self {
            request_id,
            error: Some(error),
            data: None,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        // ---
        let mut fields = Vec::with_capacity(3);
        fields.push(Value::String(self.request_id.to_string()));

        match &self.error {
            Some(err) => fields.push(err.to_value()),
            None => {
                fields.push(Value::Null);
                if let Some(data) = &self.data {
                    fields.push(data.clone());
                }
            }
        }

        Ok(Bytes::from(serde_json::to_vec(&fields)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        // ---
        let fields = parse_array(bytes)?;
        if !(2..=3).contains(&fields.len()) {
            return Err(RpcError::Decode(format!(
                "reply must have 2 or 3 fields, got {}",
                fields.len()
            )));
        }

        let mut fields = fields.into_iter();

        let request_id = match fields.next() {
            Some(Value::String(s)) => RequestId::from(s),
            other => {
                return Err(RpcError::Decode(format!(
                    "request_id must be a string, got {}",
                    other.as_ref().map_or("nothing", json_kind)
                )))
            }
        };

        let error = match fields.next() {
            None | Some(Value::Null) => None,
            Some(value @ Value::Object(_)) => Some(RemoteError::from_value(value)),
            Some(other) => {
                return Err(RpcError::Decode(format!(
                    "error must be null or an object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let data = fields.next();

        Ok(Self {
            request_id,
            error,
            data,
        })
    }
}
