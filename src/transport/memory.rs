//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended primarily for testing, local execution,
//! and as a reference for bus semantics.
//!
//! ## Reference Semantics
//!
//! - Once `subscribe()` returns successfully, messages published *after* that
//!   point on a subscribed channel are deliverable.
//! - Delivery is broadcast: every subscriber of a channel receives a copy.
//! - Messages published on one channel are delivered in publish order.
//! - `unsubscribe()` and `close()` only affect the calling transport's own
//!   subscriptions, even when several transports share a hub.
//!
//! ## Non-Goals
//!
//! This transport does not attempt to emulate the failure modes, persistence,
//! or delivery guarantees of any specific broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

use crate::{
    // ---
    log_debug,
    Channel,
    Envelope,
    Result,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

const INBOX_CAPACITY: usize = 64;

/// Subscriber registered on a hub channel, tagged with its owning transport.
struct Subscriber {
    owner: u64,
    tx: mpsc::Sender<Envelope>,
}

/// Shared message bus for the in-memory transport.
///
/// Simulates a broker within a single process. All transports that share a
/// `MemoryHub` can publish and receive each other's messages, exactly as
/// nodes connected to a real broker would.
///
/// Tests that run in parallel should each construct their own hub and pass
/// it to [`create_memory_transport_with_hub`].
///
/// ```
/// # use pubsub_rpc::{MemoryHub, TransportConfig};
/// # async fn example() -> pubsub_rpc::Result<()> {
/// let hub = MemoryHub::new();
///
/// let requester_bus =
///     pubsub_rpc::create_memory_transport_with_hub(TransportConfig::memory("requester"), hub.clone()).await?;
/// let responder_bus =
///     pubsub_rpc::create_memory_transport_with_hub(TransportConfig::memory("responder"), hub.clone()).await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    subscriptions: RwLock<HashMap<Channel, Vec<Subscriber>>>,
    next_owner: AtomicU64,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self::default())
    }

    fn register_owner(&self) -> u64 {
        self.next_owner.fetch_add(1, Ordering::Relaxed)
    }

    async fn publish(&self, transport_id: &str, channel: &Channel, payload: Bytes) -> Result<()> {
        // ---
        // Senders are cloned out so that no lock is held across a send that
        // may wait for inbox capacity.
        let senders: Vec<mpsc::Sender<Envelope>> = {
            let subs = self.subscriptions.read().await;
            subs.get(channel)
                .map(|list| list.iter().map(|s| s.tx.clone()).collect())
                .unwrap_or_default()
        };

        log_debug!(
            "{transport_id}: publish to {channel} ({} subscribers)",
            senders.len()
        );

        for tx in senders {
            let env = Envelope {
                channel: channel.clone(),
                payload: payload.clone(),
            };
            // A closed inbox means the subscriber went away; broadcast to
            // whoever is left.
            if tx.send(env).await.is_err() {
                log_debug!("{transport_id}: dropped message for closed inbox on {channel}");
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        transport_id: &str,
        owner: u64,
        channels: &[Channel],
    ) -> Result<SubscriptionHandle> {
        // ---
        log_debug!("{transport_id}: subscribe to {channels:?}");

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let mut subs = self.subscriptions.write().await;
        for channel in channels {
            subs.entry(channel.clone()).or_default().push(Subscriber {
                owner,
                tx: tx.clone(),
            });
        }

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn unsubscribe(&self, transport_id: &str, owner: u64, channels: &[Channel]) {
        // ---
        log_debug!("{transport_id}: unsubscribe from {channels:?}");

        let mut subs = self.subscriptions.write().await;
        for channel in channels {
            if let Some(list) = subs.get_mut(channel) {
                list.retain(|s| s.owner != owner);
                if list.is_empty() {
                    subs.remove(channel);
                }
            }
        }
    }

    async fn close(&self, transport_id: &str, owner: u64) {
        // ---
        log_debug!("{transport_id}: closing transport...");

        let mut subs = self.subscriptions.write().await;
        subs.retain(|_, list| {
            list.retain(|s| s.owner != owner);
            !list.is_empty()
        });
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_owner: AtomicU64::new(1),
        }
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport routing through a shared [`MemoryHub`].
struct MemoryTransport {
    // ---
    base: TransportBase,
    owner: u64,
    hub: Arc<MemoryHub>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, channel: &Channel, payload: Bytes) -> Result<()> {
        self.hub.publish(self.transport_id(), channel, payload).await
    }

    async fn subscribe(&self, channels: &[Channel]) -> Result<SubscriptionHandle> {
        self.hub
            .subscribe(self.transport_id(), self.owner, channels)
            .await
    }

    async fn unsubscribe(&self, channels: &[Channel]) -> Result<()> {
        self.hub
            .unsubscribe(self.transport_id(), self.owner, channels)
            .await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.hub.close(self.transport_id(), self.owner).await;
        Ok(())
    }
}

/// Create a new in-memory transport using the process-global hub.
///
/// All transports created with this function share a single message bus.
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(config, global_hub()).await
}

/// Create a new in-memory transport using the provided hub.
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport_with_hub(
    config: TransportConfig,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    log_debug!("{}: create memory transport", config.node_id);

    let transport = MemoryTransport {
        base: TransportBase::from(&config),
        owner: hub.register_owner(),
        hub,
    };

    Ok(Arc::new(transport))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use tokio::time::{timeout, Duration};

    async fn pair(hub: &Arc<MemoryHub>) -> (TransportPtr, TransportPtr) {
        // ---
        let a = create_memory_transport_with_hub(TransportConfig::memory("a"), hub.clone())
            .await
            .unwrap();
        let b = create_memory_transport_with_hub(TransportConfig::memory("b"), hub.clone())
            .await
            .unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_broadcast_to_every_subscriber() {
        // ---
        let hub = MemoryHub::new();
        let (a, b) = pair(&hub).await;
        let channel = Channel::from("news");

        let mut sub_a = a.subscribe(&[channel.clone()]).await.unwrap();
        let mut sub_b = b.subscribe(&[channel.clone()]).await.unwrap();

        a.publish(&channel, Bytes::from_static(b"hello")).await.unwrap();

        for inbox in [&mut sub_a.inbox, &mut sub_b.inbox] {
            let env = timeout(Duration::from_millis(100), inbox.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(env.channel, channel);
            assert_eq!(env.payload, Bytes::from_static(b"hello"));
        }
    }

    #[tokio::test]
    async fn test_close_only_drops_own_subscriptions() {
        // ---
        let hub = MemoryHub::new();
        let (a, b) = pair(&hub).await;
        let channel = Channel::from("news");

        let mut sub_a = a.subscribe(&[channel.clone()]).await.unwrap();
        let mut sub_b = b.subscribe(&[channel.clone()]).await.unwrap();

        a.close().await.unwrap();
        b.publish(&channel, Bytes::from_static(b"still here")).await.unwrap();

        // a's inbox is closed: its only sender lived in the hub
        assert!(sub_a.inbox.recv().await.is_none());
        assert!(sub_b.inbox.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_unsubscribe_one_channel_keeps_the_other() {
        // ---
        let hub = MemoryHub::new();
        let (a, b) = pair(&hub).await;
        let first = Channel::from("first");
        let second = Channel::from("second");

        let mut sub = a.subscribe(&[first.clone(), second.clone()]).await.unwrap();
        a.unsubscribe(&[first.clone()]).await.unwrap();

        b.publish(&first, Bytes::from_static(b"1")).await.unwrap();
        b.publish(&second, Bytes::from_static(b"2")).await.unwrap();

        let env = timeout(Duration::from_millis(100), sub.inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.channel, second);
    }
}
