use bytes::Bytes;
use serde_json::{Map, Value};

use super::{json_kind, parse_array};
use crate::{RequestId, Result, RpcError};

const REQUEST_FIELDS: usize = 6;

/// A request as it travels over the bus.
///
/// Encoded positionally as
/// `[reply_channel, request_id, name, expiry, context_data, payload]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMessage {
    /// Channel the reply must be published to.
    pub reply_channel: String,
    /// Identity echoed back in the reply.
    pub request_id: RequestId,
    /// Logical request name, without any responder-side prefix.
    pub name: String,
    /// Absolute deadline in milliseconds since the Unix epoch.
    pub expiry: i64,
    /// Propagated caller context (tracing ids and the like).
    pub context_data: Map<String, Value>,
    /// Request arguments.
    pub payload: Value,
}

impl RequestMessage {
    // ---

    pub fn encode(&self) -> Result<Bytes> {
        // ---
        let wire = (
            &self.reply_channel,
            &self.request_id,
            &self.name,
            self.expiry,
            &self.context_data,
            &self.payload,
        );
        Ok(Bytes::from(serde_json::to_vec(&wire)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        // ---
        let fields = parse_array(bytes)?;
        if fields.len() != REQUEST_FIELDS {
            return Err(RpcError::Decode(format!(
                "request must have {REQUEST_FIELDS} fields, got {}",
                fields.len()
            )));
        }

        let mut fields = fields.into_iter();
        let mut next = || fields.next().unwrap_or(Value::Null);

        let reply_channel = expect_string(next(), "reply_channel")?;
        let request_id = RequestId::from(expect_string(next(), "request_id")?);
        let name = expect_string(next(), "name")?;

        let expiry = match next() {
            Value::Number(n) => n.as_i64().ok_or_else(|| {
                RpcError::Decode(format!("expiry must be an integer, got {n}"))
            })?,
            other => {
                return Err(RpcError::Decode(format!(
                    "expiry must be an integer, got {}",
                    json_kind(&other)
                )))
            }
        };

        let context_data = match next() {
            Value::Object(map) => map,
            other => {
                return Err(RpcError::Decode(format!(
                    "context_data must be an object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let payload = next();

        Ok(Self {
            reply_channel,
            request_id,
            name,
            expiry,
            context_data,
            payload,
        })
    }
}

fn expect_string(value: Value, field: &str) -> Result<String> {
    // ---
    match value {
        Value::String(s) => Ok(s),
        other => Err(RpcError::Decode(format!(
            "{field} must be a string, got {}",
            json_kind(&other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn sample() -> RequestMessage {
        // ---
        let mut context_data = Map::new();
        context_data.insert("trace".into(), json!("abc"));

        RequestMessage {
            reply_channel: "reply.x".into(),
            request_id: RequestId::from("r9"),
            name: "greet".into(),
            expiry: 9_999_999_999_999,
            context_data,
            payload: json!({"who": "Ann"}),
        }
    }

    #[test]
    fn test_encode_is_positional() {
        // ---
        let bytes = sample().encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!(["reply.x", "r9", "greet", 9_999_999_999_999i64, {"trace": "abc"}, {"who": "Ann"}])
        );
    }

    #[test]
    fn test_decode_restores_every_field() {
        // ---
        let original = sample();
        let decoded = RequestMessage::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_literal_request() {
        // ---
        let raw = br#"["reply.x","r9","greet",9999999999999,{},{"who":"Ann"}]"#;
        let msg = RequestMessage::decode(raw).unwrap();
        assert_eq!(msg.reply_channel, "reply.x");
        assert_eq!(msg.request_id.as_str(), "r9");
        assert_eq!(msg.name, "greet");
        assert_eq!(msg.expiry, 9_999_999_999_999);
        assert!(msg.context_data.is_empty());
        assert_eq!(msg.payload, json!({"who": "Ann"}));
    }

    #[test]
    fn test_null_payload_is_kept() {
        // ---
        let msg = RequestMessage {
            payload: Value::Null,
            ..sample()
        };
        let value: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(value[5], Value::Null);

        let decoded = RequestMessage::decode(br#"["reply.x","r9","greet",1,{},null]"#).unwrap();
        assert_eq!(decoded.payload, Value::Null);
    }

    #[test]
    fn test_decode_rejects_wrong_arity() {
        // ---
        let raw = br#"["reply.x","r9","greet",1,{}]"#;
        assert!(matches!(
            RequestMessage::decode(raw),
            Err(RpcError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_types() {
        // ---
        let cases: [&[u8]; 5] = [
            br#"[1,"r9","greet",1,{},null]"#,
            br#"["reply.x",9,"greet",1,{},null]"#,
            br#"["reply.x","r9","greet","soon",{},null]"#,
            br#"["reply.x","r9","greet",1.5,{},null]"#,
            br#"["reply.x","r9","greet",1,[],null]"#,
        ];
        for raw in cases {
            assert!(
                matches!(RequestMessage::decode(raw), Err(RpcError::Decode(_))),
                "accepted {}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn test_decode_rejects_non_json() {
        // ---
        assert!(matches!(
            RequestMessage::decode(b"not json"),
            Err(RpcError::Decode(_))
        ));
        assert!(matches!(
            RequestMessage::decode(br#"{"name":"greet"}"#),
            Err(RpcError::Decode(_))
        ));
    }
}
