//! Requester and responder configuration.
//!
//! Both types deserialize from the JSON documents a deployment already
//! carries, for example:
//!
//! ```json
//! {
//!   "redis": { "uri": "redis://localhost:6379", "node_id": "billing" },
//!   "reply_channel": "replies.billing.1",
//!   "default_ttl": 5000,
//!   "names": { "users.get": "svc.users" },
//!   "patterns": { "orders\\..*": "svc.orders" }
//! }
//! ```
//!
//! `redis` is accepted as an alias of `transport`. Each type also offers
//! `with_*` builders for programmatic setup.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::{Result, RpcError, TransportConfig};

/// Default time a request waits for its reply: 10 seconds.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

fn default_ttl_ms() -> u64 {
    DEFAULT_TTL.as_millis() as u64
}

/// Configuration of a [`Responder`](crate::Responder).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponderConfig {
    // ---
    /// Bus connection parameters.
    #[serde(default, alias = "redis")]
    pub transport: TransportConfig,

    /// Subscribed channel → name prefix prepended before dispatch.
    #[serde(default)]
    pub subscriptions: BTreeMap<String, String>,
}

impl ResponderConfig {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            subscriptions: BTreeMap::new(),
        }
    }

    /// Subscribe to `channel`, dispatching its requests as `prefix + name`.
    pub fn with_subscription(mut self, channel: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.subscriptions.insert(channel.into(), prefix.into());
        self
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Configuration of a [`Requester`](crate::Requester).
#[derive(Debug, Clone, Deserialize)]
pub struct RequesterConfig {
    // ---
    /// Bus connection parameters.
    #[serde(default, alias = "redis")]
    pub transport: TransportConfig,

    /// Channel this requester listens on for replies. Must be unique to the
    /// requester instance.
    pub reply_channel: String,

    /// Time to wait for a reply when the context carries no deadline,
    /// in milliseconds.
    #[serde(default = "default_ttl_ms", rename = "default_ttl")]
    pub default_ttl_ms: u64,

    /// Request name → destination channel.
    #[serde(default)]
    pub names: BTreeMap<String, String>,

    /// Request name pattern (regular expression) → destination channel.
    #[serde(default)]
    pub patterns: BTreeMap<String, String>,
}

impl RequesterConfig {
    // ---

    pub fn new(transport: TransportConfig, reply_channel: impl Into<String>) -> Self {
        Self {
            transport,
            reply_channel: reply_channel.into(),
            default_ttl_ms: default_ttl_ms(),
            names: BTreeMap::new(),
            patterns: BTreeMap::new(),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Route requests named exactly `name` to `channel`.
    pub fn with_name_route(mut self, name: impl Into<String>, channel: impl Into<String>) -> Self {
        self.names.insert(name.into(), channel.into());
        self
    }

    /// Route requests whose name matches `pattern` to `channel`.
    pub fn with_pattern_route(
        mut self,
        pattern: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        self.patterns.insert(pattern.into(), channel.into());
        self
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        // ---
        if self.reply_channel.is_empty() {
            return Err(RpcError::MissingConfig("reply_channel".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_requester_from_json() {
        // ---
        let config = RequesterConfig::from_json(
            r#"{
                "redis": { "uri": "redis://localhost:6379", "node_id": "billing" },
                "reply_channel": "replies.billing.1",
                "names": { "users.get": "svc.users" },
                "patterns": { "orders\\..*": "svc.orders" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.transport.uri, "redis://localhost:6379");
        assert_eq!(config.reply_channel, "replies.billing.1");
        assert_eq!(config.default_ttl(), DEFAULT_TTL);
        assert_eq!(config.names["users.get"], "svc.users");
        assert_eq!(config.patterns[r"orders\..*"], "svc.orders");
    }

    #[test]
    fn test_requester_ttl_override() {
        // ---
        let config = RequesterConfig::from_json(r#"{"reply_channel": "r", "default_ttl": 250}"#)
            .unwrap();
        assert_eq!(config.default_ttl(), Duration::from_millis(250));
    }

    #[test]
    fn test_requester_requires_reply_channel() {
        // ---
        assert!(RequesterConfig::from_json("{}").is_err());

        let config = RequesterConfig::new(TransportConfig::memory("x"), "");
        assert!(matches!(config.validate(), Err(RpcError::MissingConfig(_))));
    }

    #[test]
    fn test_redis_client_options_section() {
        // ---
        let config = RequesterConfig::from_json(
            r#"{
                "redis": { "host": "10.0.0.7", "port": 6379, "password": "s3cret" },
                "reply_channel": "r"
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.transport.broker_uri().as_deref(),
            Some("redis://:s3cret@10.0.0.7:6379")
        );

        let config =
            ResponderConfig::from_json(r#"{ "redis": { "host": "cache", "db": 3 } }"#).unwrap();
        assert_eq!(
            config.transport.broker_uri().as_deref(),
            Some("redis://cache:6379/3")
        );
    }

    #[test]
    fn test_responder_from_json() {
        // ---
        let config = ResponderConfig::from_json(
            r#"{ "subscriptions": { "svc.users": "users.", "svc.misc": "" } }"#,
        )
        .unwrap();

        assert_eq!(config.subscriptions["svc.users"], "users.");
        assert_eq!(config.subscriptions["svc.misc"], "");
    }
}
