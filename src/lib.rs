//! Request/reply RPC over a publish/subscribe bus.
//!
//! A [`Requester`] publishes named requests to destination channels and
//! correlates the replies that come back on its own reply channel, enforcing
//! a deadline on each. A [`Responder`] subscribes to request channels,
//! dispatches each request to a handler in a [`HandlerRegistry`], and
//! publishes exactly one reply.
//!
//! The bus itself is abstracted behind [`Transport`]. An in-process bus
//! ([`create_memory_transport`]) is always available; a Redis Pub/Sub bus is
//! available with the `transport_redis` feature.
//!
//! ```
//! use std::sync::Arc;
//! use pubsub_rpc::{
//!     create_memory_transport_with_hub, Context, HandlerRegistry, MemoryHub,
//!     Requester, RequesterConfig, Responder, ResponderConfig, TransportConfig,
//! };
//! use serde_json::json;
//!
//! # async fn example() -> pubsub_rpc::Result<()> {
//! let hub = MemoryHub::new();
//!
//! let registry = Arc::new(HandlerRegistry::new());
//! registry.reply("greet", |_ctx, payload| async move {
//!     Ok(Some(json!({ "msg": format!("hi {}", payload["who"].as_str().unwrap_or("?")) })))
//! });
//!
//! let server_bus = create_memory_transport_with_hub(TransportConfig::memory("server"), hub.clone()).await?;
//! let responder = Responder::new(
//!     server_bus,
//!     registry,
//!     ResponderConfig::default().with_subscription("svc.greeter", ""),
//! );
//! responder.initialize().await?;
//!
//! let client_bus = create_memory_transport_with_hub(TransportConfig::memory("client"), hub).await?;
//! let requester = Requester::new(
//!     client_bus,
//!     RequesterConfig::new(TransportConfig::memory("client"), "reply.client")
//!         .with_name_route("greet", "svc.greeter"),
//! )?;
//! requester.initialize().await?;
//!
//! let reply = requester
//!     .request(&Context::new(), "greet", json!({ "who": "Ann" }))
//!     .await?;
//! assert_eq!(reply, Some(json!({ "msg": "hi Ann" })));
//! # Ok(())
//! # }
//! ```

mod macros;
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

mod context;
mod correlation;
mod domain;
mod error;
mod protocol;
mod registry;
mod requester;
mod responder;
mod rpc_config;
mod transport;
mod transport_builder;

pub use context::Context;
pub use correlation::RequestId;
pub use error::{Result, RpcError};
pub use protocol::{RemoteError, ReplyMessage, RequestMessage};
pub use registry::{HandlerRegistry, HandlerResult};
pub use requester::{Completion, Requester};
pub use responder::Responder;
pub use rpc_config::{RequesterConfig, ResponderConfig, DEFAULT_TTL};
pub use transport_builder::TransportBuilder;

pub use transport::{
    // ---
    create_memory_transport,
    create_memory_transport_with_hub,
    create_redis_transport,
    MemoryHub,
};

// --- public re-exports
pub use domain::{
    //
    Channel,
    Envelope,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

/// Create the transport described by `config`.
///
/// An explicit `transport_type` of `"memory"` or `"redis"` wins; otherwise a
/// `redis://` or `rediss://` URI selects Redis and anything else the
/// process-global in-memory bus.
pub async fn create_transport(config: &TransportConfig) -> Result<TransportPtr> {
    // ---
    transport_builder::build_transport(config.clone()).await
}
