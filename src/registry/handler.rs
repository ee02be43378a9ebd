use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{Context, RemoteError};

/// Outcome of a handler: `Ok(None)` means "no result", which is different
/// from `Ok(Some(Value::Null))`.
pub type HandlerResult = std::result::Result<Option<Value>, RemoteError>;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased async handler.
///
/// Receives the request context, the full (prefixed) request name and the
/// raw payload. Wrapped in Arc for cheap cloning into dispatch tasks.
pub(crate) type BoxedHandler =
    Arc<dyn Fn(Context, String, Value) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Wrap a handler that does not care which name it was invoked under.
pub(crate) fn wrap_exact<F, Fut>(handler: F) -> BoxedHandler
where
    F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    // ---
    Arc::new(
        move |ctx: Context, _name: String, payload: Value| -> BoxFuture<'static, HandlerResult> {
            Box::pin(handler(ctx, payload))
        },
    )
}

/// Wrap a pattern handler, which receives the matched name.
pub(crate) fn wrap_pattern<F, Fut>(handler: F) -> BoxedHandler
where
    F: Fn(Context, String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    // ---
    Arc::new(
        move |ctx: Context, name: String, payload: Value| -> BoxFuture<'static, HandlerResult> {
            Box::pin(handler(ctx, name, payload))
        },
    )
}

/// Wrap a typed handler.
///
/// The payload is deserialized into `Req` before the handler runs and the
/// handler's `Resp` is serialized into the reply data. A payload that does
/// not fit `Req` fails the request with a `DecodeError`.
pub(crate) fn wrap_typed<F, Fut, Req, Resp>(handler: F) -> BoxedHandler
where
    F: Fn(Context, Req) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = std::result::Result<Resp, RemoteError>> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    // ---
    Arc::new(
        move |ctx: Context, _name: String, payload: Value| -> BoxFuture<'static, HandlerResult> {
            let handler = handler.clone();
            Box::pin(async move {
                let req: Req = serde_json::from_value(payload)
                    .map_err(|err| RemoteError::new("DecodeError", err.to_string()))?;

                let resp = handler(ctx, req).await?;

                let value = serde_json::to_value(resp)
                    .map_err(|err| RemoteError::new("EncodeError", err.to_string()))?;
                Ok::<_, RemoteError>(Some(value))
            })
        },
    )
}
