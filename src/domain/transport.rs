// src/domain/transport.rs

//! Bus domain abstractions.
//!
//! This module defines the interface the requester and responder use to
//! exchange messages. It intentionally avoids any reference to concrete
//! brokers or client libraries.
//!
//! The bus is responsible only for broadcasting opaque byte payloads to
//! the current subscribers of a named channel. Request identity, reply
//! correlation and deadlines are layered on top by the crate's core and
//! never leak into this interface.
//!
//! Concrete implementations live under `src/transport/`.
use crate::Result;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Shared base state for all transport implementations.
///
/// Each concrete transport embeds this as a field named `base` so that the
/// default `Transport` methods can delegate to it.
pub struct TransportBase {
    /// Unique identifier for this transport instance (the node_id).
    pub transport_id: String,
}

impl From<&TransportConfig> for TransportBase {
    fn from(config: &TransportConfig) -> Self {
        // ---
        Self {
            transport_id: config.node_id.clone(),
        }
    }
}

/// Configuration for creating a transport instance.
///
/// Deserializable so that it can sit inside the responder and requester
/// configuration documents. Besides `uri`, the Redis client option keys
/// `host`, `port`, `db` and `password` are understood, so a section such as
/// `{"host": "10.0.0.7", "port": 6379}` selects that broker.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TransportConfig {
    /// Broker URI (e.g. `"redis://localhost:6379"`); empty for the memory bus.
    #[serde(default, alias = "url")]
    pub uri: String,

    /// Node ID for this transport instance, used in logs.
    #[serde(default)]
    pub node_id: String,

    /// Optional transport type override (`"memory"` or `"redis"`).
    /// If `None`, the broker URI decides.
    #[serde(default)]
    pub transport_type: Option<String>,

    /// Broker host, used when `uri` is empty.
    #[serde(default)]
    pub host: Option<String>,

    /// Broker port, used when `uri` is empty. Defaults to 6379.
    #[serde(default)]
    pub port: Option<u16>,

    /// Redis database index.
    #[serde(default)]
    pub db: Option<u32>,

    /// Broker password.
    #[serde(default)]
    pub password: Option<String>,
}

const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
const DEFAULT_REDIS_PORT: u16 = 6379;

impl TransportConfig {
    /// Config for the in-process bus.
    pub fn memory(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            transport_type: Some("memory".into()),
            ..Self::default()
        }
    }

    /// Config for a broker reachable at `uri`.
    pub fn with_broker(uri: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    /// The broker to connect to, if any.
    ///
    /// `uri` wins when set. Otherwise a `redis://` URI is assembled from
    /// `host`, `port`, `password` and `db` as soon as any of them is given.
    /// `None` means no broker was configured.
    pub fn broker_uri(&self) -> Option<String> {
        // ---
        if !self.uri.is_empty() {
            return Some(self.uri.clone());
        }
        if self.host.is_none() && self.port.is_none() && self.db.is_none() && self.password.is_none()
        {
            return None;
        }

        let host = self.host.as_deref().unwrap_or(DEFAULT_REDIS_HOST);
        let port = self.port.unwrap_or(DEFAULT_REDIS_PORT);
        let auth = self
            .password
            .as_deref()
            .map(|pw| format!(":{}@", encode_userinfo(pw)))
            .unwrap_or_default();
        let db = self.db.map(|db| format!("/{db}")).unwrap_or_default();

        Some(format!("redis://{auth}{host}:{port}{db}"))
    }
}

/// Percent-encode everything outside the URI "unreserved" set.
fn encode_userinfo(raw: &str) -> String {
    // ---
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// A bus channel name.
///
/// Channels are compared by exact string value; the domain layer makes no
/// assumptions about hierarchy or wildcard syntax.
///
/// Channels are immutable, cheap to clone, and safe to share across threads.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(pub Arc<str>);

impl Channel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Channel
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Channel(value.into())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message delivered from the bus: the channel it arrived on and the raw
/// bytes that were published.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub channel: Channel,
    pub payload: Bytes,
}

/// Handle returned from a successful subscription.
///
/// Messages for every channel passed to [`Transport::subscribe`] arrive on
/// the same inbox, tagged with their channel. The inbox closes when the
/// transport unsubscribes those channels or is closed.
pub struct SubscriptionHandle {
    // ---
    /// Receiver channel for delivered envelopes.
    pub inbox: mpsc::Receiver<Envelope>,
}

/// Publish/subscribe bus abstraction.
///
/// Implementations must ensure that:
/// - Once `subscribe()` returns successfully, messages published *after* that
///   point on a subscribed channel are deliverable.
/// - `publish()` does not wait on subscribers to process the message.
/// - No assumptions are made about durability or retries; delivery is
///   ordered per channel, at-most-once or at-least-once.
///
/// The in-memory transport serves as the reference implementation.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Returns a reference to the shared base state.
    fn base(&self) -> &TransportBase;

    /// Returns the transport_id of the transport.
    fn transport_id(&self) -> &str {
        &self.base().transport_id
    }

    /// Broadcast `payload` to every current subscriber of `channel`.
    async fn publish(&self, channel: &Channel, payload: Bytes) -> Result<()>;

    /// Subscribe to a set of channels and return one inbox for all of them.
    async fn subscribe(&self, channels: &[Channel]) -> Result<SubscriptionHandle>;

    /// Stop receiving messages on the given channels.
    async fn unsubscribe(&self, channels: &[Channel]) -> Result<()>;

    /// Close the transport and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// `.clone()` is cheap and all clones share the same underlying connection.
pub type TransportPtr = Arc<dyn Transport>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_explicit_uri_wins() {
        // ---
        let config = TransportConfig {
            uri: "redis://cache:6380".into(),
            host: Some("ignored".into()),
            ..TransportConfig::default()
        };
        assert_eq!(config.broker_uri().as_deref(), Some("redis://cache:6380"));
    }

    #[test]
    fn test_client_options_build_uri() {
        // ---
        let config: TransportConfig =
            serde_json::from_str(r#"{"host": "10.0.0.7", "port": 6380, "db": 2}"#).unwrap();
        assert_eq!(config.broker_uri().as_deref(), Some("redis://10.0.0.7:6380/2"));

        let config: TransportConfig = serde_json::from_str(r#"{"port": 6379}"#).unwrap();
        assert_eq!(config.broker_uri().as_deref(), Some("redis://127.0.0.1:6379"));
    }

    #[test]
    fn test_password_is_escaped() {
        // ---
        let config: TransportConfig =
            serde_json::from_str(r#"{"host": "h", "password": "p@ss:w/rd"}"#).unwrap();
        assert_eq!(
            config.broker_uri().as_deref(),
            Some("redis://:p%40ss%3Aw%2Frd@h:6379")
        );
    }

    #[test]
    fn test_memory_has_no_broker() {
        // ---
        assert_eq!(TransportConfig::memory("n1").broker_uri(), None);
        assert_eq!(TransportConfig::default().broker_uri(), None);
    }
}
