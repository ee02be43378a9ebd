//! Per-request context.
//!
//! A [`Context`] travels with a request from caller to handler. On the
//! requesting side it supplies the optional id (to continue an existing
//! request chain), the optional absolute deadline, and propagated data. On
//! the responding side it is rebuilt from the decoded request and carries a
//! `tracing` span scoped to the request id.

use serde_json::{Map, Value};
use std::time::Duration;
use tracing::Span;

use crate::protocol::{now_ms, RequestMessage};
use crate::RequestId;

#[derive(Debug, Clone)]
pub struct Context {
    id: Option<RequestId>,
    deadline_ms: Option<i64>,
    data: Map<String, Value>,
    span: Span,
}

impl Context {
    // ---

    /// Empty context: fresh id, default ttl, no propagated data.
    pub fn new() -> Self {
        // ---
        Self {
            id: None,
            deadline_ms: None,
            data: Map::new(),
            span: Span::none(),
        }
    }

    /// Rebuild the handling-side context from an inbound request.
    pub(crate) fn from_request(msg: &RequestMessage) -> Self {
        // ---
        let span = tracing::info_span!(
            "request",
            req_id = %msg.request_id,
            name = %msg.name,
        );

        Self {
            id: Some(msg.request_id.clone()),
            deadline_ms: Some(msg.expiry),
            data: msg.context_data.clone(),
            span,
        }
    }

    /// Reuse an existing request id instead of generating one.
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set an absolute deadline in milliseconds since the Unix epoch.
    pub fn with_deadline_ms(mut self, deadline_ms: i64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// Set the deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        // ---
        let millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        self.with_deadline_ms(now_ms().saturating_add(millis))
    }

    /// Add a propagated context entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    pub fn deadline_ms(&self) -> Option<i64> {
        self.deadline_ms
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Span scoped to this request; `Span::none()` on the requesting side.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Time left until the deadline, zero once it has passed.
    ///
    /// `None` when the context carries no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        // ---
        self.deadline_ms.map(|deadline| {
            let left = deadline.saturating_sub(now_ms()).max(0);
            Duration::from_millis(left as u64)
        })
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_context_is_open_ended() {
        // ---
        let ctx = Context::new();
        assert!(ctx.id().is_none());
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_expired());
    }

    #[test]
    fn test_timeout_sets_future_deadline() {
        // ---
        let ctx = Context::new().with_timeout(Duration::from_secs(30));
        let left = ctx.remaining().unwrap();
        assert!(left > Duration::from_secs(25));
        assert!(left <= Duration::from_secs(30));
    }

    #[test]
    fn test_past_deadline_is_expired() {
        // ---
        let ctx = Context::new().with_deadline_ms(now_ms() - 1_000);
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
        assert!(ctx.is_expired());
    }

    #[test]
    fn test_from_request_carries_wire_fields() {
        // ---
        let mut context_data = Map::new();
        context_data.insert("trace".into(), json!("t-1"));

        let msg = RequestMessage {
            reply_channel: "reply.x".into(),
            request_id: RequestId::from("r9"),
            name: "greet".into(),
            expiry: 9_999_999_999_999,
            context_data,
            payload: json!({}),
        };

        let ctx = Context::from_request(&msg);
        assert_eq!(ctx.id().map(RequestId::as_str), Some("r9"));
        assert_eq!(ctx.deadline_ms(), Some(9_999_999_999_999));
        assert_eq!(ctx.data().get("trace"), Some(&json!("t-1")));
    }
}
