//! Transport builder for creating transport instances.
//!
//! Provides a fluent builder API for constructing transports, and the
//! selection rule shared with [`create_transport`](crate::create_transport).

use crate::{Result, RpcError, TransportConfig, TransportPtr};

/// Builder for creating transport instances.
///
/// # Examples
///
/// ## Redis broker
/// ```no_run
/// use pubsub_rpc::TransportBuilder;
///
/// # async fn example() -> pubsub_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("redis://localhost:6379")
///     .node_id("billing")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// ## In-process bus
/// ```
/// use pubsub_rpc::TransportBuilder;
///
/// # async fn example() -> pubsub_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .node_id("local")
///     .transport_type("memory")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct TransportBuilder {
    uri: Option<String>,
    node_id: Option<String>,
    transport_type: Option<String>,
}

impl TransportBuilder {
    /// Create a new transport builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the broker URI.
    ///
    /// Required for the Redis transport, e.g. `"redis://localhost:6379"`.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the node ID (required).
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Set explicit transport type: `"memory"` or `"redis"`.
    ///
    /// If not specified, the URI scheme decides; no URI means the memory bus.
    pub fn transport_type(mut self, flag: impl Into<String>) -> Self {
        self.transport_type = Some(flag.into());
        self
    }

    /// Build the transport (consumes self).
    ///
    /// # Errors
    ///
    /// Returns error if `node_id` is missing, the transport type is unknown,
    /// or transport creation fails.
    pub async fn build(self) -> Result<TransportPtr> {
        // ---
        let node_id = self
            .node_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RpcError::MissingConfig("node_id".into()))?;

        let config = TransportConfig {
            uri: self.uri.unwrap_or_default(),
            node_id,
            transport_type: self.transport_type,
            ..TransportConfig::default()
        };

        build_transport(config).await
    }
}

/// Dispatch to the transport factory selected by `config`.
///
/// An explicit `transport_type` wins. Otherwise a configured broker selects
/// Redis and no broker at all the in-memory bus. A broker URI with any
/// other scheme is an error rather than a silent fallback.
pub(crate) async fn build_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    let kind = match (config.transport_type.as_deref(), config.broker_uri()) {
        (Some(kind), _) => kind.to_string(),
        (None, Some(uri)) if is_redis_uri(&uri) => "redis".to_string(),
        (None, Some(uri)) => {
            return Err(RpcError::Transport(format!(
                "unsupported broker uri scheme: {}",
                uri.split("://").next().unwrap_or_default()
            )))
        }
        (None, None) => "memory".to_string(),
    };

    match kind.as_str() {
        "memory" => crate::create_memory_transport(config).await,
        "redis" => crate::create_redis_transport(config).await,
        other => Err(RpcError::Transport(format!(
            "unrecognized transport_type: {other}, valid values: memory, redis"
        ))),
    }
}

fn is_redis_uri(uri: &str) -> bool {
    uri.starts_with("redis://") || uri.starts_with("rediss://")
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_redis_uri_detection() {
        // ---
        assert!(is_redis_uri("redis://localhost:6379"));
        assert!(is_redis_uri("rediss://cache.internal:6380/2"));
        assert!(!is_redis_uri("memory://"));
        assert!(!is_redis_uri(""));
    }

    #[tokio::test]
    async fn test_missing_node_id() {
        // ---
        let err = TransportBuilder::new()
            .transport_type("memory")
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RpcError::MissingConfig(field) if field == "node_id"));
    }

    #[tokio::test]
    async fn test_unknown_transport_type() {
        // ---
        let err = TransportBuilder::new()
            .node_id("n1")
            .transport_type("carrier-pigeon")
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[tokio::test]
    async fn test_unsupported_broker_scheme() {
        // ---
        let err = TransportBuilder::new()
            .node_id("n1")
            .uri("amqp://localhost:5672")
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RpcError::Transport(msg) if msg.contains("amqp")));
    }

    #[cfg(not(feature = "transport_redis"))]
    #[tokio::test]
    async fn test_host_only_config_selects_redis() {
        // ---
        let config: TransportConfig =
            serde_json::from_str(r#"{"host": "10.0.0.7", "port": 6379, "node_id": "n1"}"#)
                .unwrap();

        let err = crate::create_transport(&config).await.err().unwrap();
        assert!(matches!(err, RpcError::Transport(msg) if msg.contains("transport_redis")));
    }

    #[tokio::test]
    async fn test_memory_by_default() {
        // ---
        let transport = TransportBuilder::new().node_id("n1").build().await.unwrap();
        assert_eq!(transport.transport_id(), "n1");
    }
}
