//! Redis Pub/Sub transport.
//!
//! Enabled by the `transport_redis` feature. Without it the factory still
//! exists and fails at runtime, so that a config naming a `redis://` URI is
//! reported as a transport error instead of a build error.

#[cfg(feature = "transport_redis")]
#[allow(clippy::module_inception)]
mod redis;

#[cfg(feature = "transport_redis")]
pub use redis::create_transport as create_redis_transport;

#[cfg(not(feature = "transport_redis"))]
use crate::{log_error, Result, RpcError, TransportConfig, TransportPtr};

#[cfg(not(feature = "transport_redis"))]
pub async fn create_redis_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    log_error!(
        "{}: redis transport requested for {:?} but the transport_redis feature is disabled",
        config.node_id,
        config.broker_uri()
    );
    Err(RpcError::Transport(
        "redis transport unavailable: built without the transport_redis feature".into(),
    ))
}
