//! Handler registry.
//!
//! Maps request names to local handlers, either by exact name or by a regular
//! expression over the name. The responder dispatches inbound requests through
//! it. The requester binds its route table into it, so that a local request
//! for a routed name is forwarded over the bus.
//!
//! Lookup order: exact names first, then patterns in registration order.
//! Patterns are anchored, so `users\..*` matches `users.get` but not
//! `admin.users.get`.

mod handler;

pub use handler::HandlerResult;

use handler::BoxedHandler;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Context, RemoteError, Result};

#[derive(Default)]
struct Routes {
    exact: HashMap<String, BoxedHandler>,
    patterns: Vec<(Regex, BoxedHandler)>,
}

/// Registry of request handlers, shared by the components of one process.
#[derive(Default)]
pub struct HandlerRegistry {
    routes: RwLock<Routes>,
}

impl HandlerRegistry {
    // ---

    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for exactly `name`, replacing any previous one.
    pub fn reply<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        // ---
        self.write()
            .exact
            .insert(name.into(), handler::wrap_exact(handler));
    }

    /// Register a typed handler for exactly `name`.
    ///
    /// The payload is deserialized into `Req`; the returned `Resp` always
    /// becomes the reply data.
    pub fn reply_typed<F, Fut, Req, Resp>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Context, Req) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = std::result::Result<Resp, RemoteError>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
    {
        // ---
        self.write()
            .exact
            .insert(name.into(), handler::wrap_typed(handler));
    }

    /// Register a handler for every name matching `pattern`.
    ///
    /// The handler receives the concrete name it was invoked for.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidPattern`](crate::RpcError::InvalidPattern)
    /// if `pattern` is not a valid regular expression.
    pub fn reply_pattern<F, Fut>(&self, pattern: &str, handler: F) -> Result<()>
    where
        F: Fn(Context, String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        // ---
        let regex = anchored(pattern)?;
        self.write()
            .patterns
            .push((regex, handler::wrap_pattern(handler)));
        Ok(())
    }

    /// Whether any handler would accept `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Invoke the handler registered for `name`.
    ///
    /// When nothing matches, fails with a `HandlerNotFound` error so that
    /// the caller still receives exactly one outcome.
    pub async fn request(&self, ctx: Context, name: &str, payload: Value) -> HandlerResult {
        // ---
        match self.lookup(name) {
            Some(handler) => handler(ctx, name.to_string(), payload).await,
            None => Err(RemoteError::new(
                "HandlerNotFound",
                format!("no handler registered for request: {name}"),
            )),
        }
    }

    fn lookup(&self, name: &str) -> Option<BoxedHandler> {
        // ---
        let routes = self.read();
        if let Some(handler) = routes.exact.get(name) {
            return Some(handler.clone());
        }
        routes
            .patterns
            .iter()
            .find(|(regex, _)| regex.is_match(name))
            .map(|(_, handler)| handler.clone())
    }

    fn read(&self) -> RwLockReadGuard<'_, Routes> {
        self.routes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Routes> {
        self.routes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Compile `pattern` so that it must match the whole name.
pub(crate) fn anchored(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{pattern})$"))?)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[tokio::test]
    async fn test_exact_handler() {
        // ---
        let registry = HandlerRegistry::new();
        registry.reply("greet", |_ctx, payload: Value| async move {
            let who = payload["who"].as_str().unwrap_or("stranger").to_string();
            Ok(Some(json!({ "msg": format!("hi {who}") })))
        });

        let out = registry
            .request(Context::new(), "greet", json!({"who": "Ann"}))
            .await
            .unwrap();
        assert_eq!(out, Some(json!({"msg": "hi Ann"})));
    }

    #[tokio::test]
    async fn test_pattern_receives_matched_name() {
        // ---
        let registry = HandlerRegistry::new();
        registry
            .reply_pattern(r"users\..*", |_ctx, name: String, _payload| async move {
                Ok(Some(Value::String(name)))
            })
            .unwrap();

        let out = registry
            .request(Context::new(), "users.get", json!({}))
            .await
            .unwrap();
        assert_eq!(out, Some(json!("users.get")));
        assert!(!registry.contains("admin.users.get"));
    }

    #[tokio::test]
    async fn test_exact_wins_over_pattern() {
        // ---
        let registry = HandlerRegistry::new();
        registry
            .reply_pattern(".*", |_ctx, _name, _payload| async { Ok(Some(json!("pattern"))) })
            .unwrap();
        registry.reply("ping", |_ctx, _payload| async { Ok(Some(json!("exact"))) });

        let out = registry.request(Context::new(), "ping", json!({})).await.unwrap();
        assert_eq!(out, Some(json!("exact")));
    }

    #[tokio::test]
    async fn test_missing_handler() {
        // ---
        let registry = HandlerRegistry::new();
        let err = registry
            .request(Context::new(), "nope", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "HandlerNotFound");
    }

    #[test]
    fn test_invalid_pattern() {
        // ---
        let registry = HandlerRegistry::new();
        let result = registry.reply_pattern("users.(", |_ctx, _name, _payload| async { Ok(None) });
        assert!(matches!(result, Err(crate::RpcError::InvalidPattern(_))));
    }

    #[derive(Debug, Deserialize)]
    struct AddRequest {
        a: i32,
        b: i32,
    }

    #[derive(Debug, Serialize)]
    struct AddResponse {
        sum: i32,
    }

    #[tokio::test]
    async fn test_typed_handler() {
        // ---
        let registry = HandlerRegistry::new();
        registry.reply_typed("add", |_ctx, req: AddRequest| async move {
            Ok(AddResponse { sum: req.a + req.b })
        });

        let out = registry
            .request(Context::new(), "add", json!({"a": 2, "b": 3}))
            .await
            .unwrap();
        assert_eq!(out, Some(json!({"sum": 5})));

        let err = registry
            .request(Context::new(), "add", json!({"a": "two"}))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "DecodeError");
    }
}
