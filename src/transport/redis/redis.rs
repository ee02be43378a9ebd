//! Redis Pub/Sub transport implementation using `redis`.
//!
//! ## Concurrency model
//!
//! A single background **actor task** owns both Redis connections and is
//! responsible for:
//!   - publishing outbound payloads via `publish_conn`,
//!   - (un)registering broker subscriptions via `pubsub_sink`,
//!   - polling `pubsub_stream` for incoming messages,
//!   - clean shutdown.
//!
//! All interaction with the Redis client is serialized through this actor;
//! no other task touches the connections directly.
//!
//! ## Two connections required
//!
//! A connection in Pub/Sub mode cannot issue `PUBLISH`, so two async
//! connections are maintained:
//!
//! - `publish_conn`: `MultiplexedConnection`, used only for `PUBLISH`
//! - `pubsub_sink` / `pubsub_stream`: split from `aio::PubSub`, used for
//!   `SUBSCRIBE`/`UNSUBSCRIBE` and receiving messages respectively
//!
//! `PubSubSink::subscribe()` resolves only after the broker confirms the
//! subscription, so a successful `subscribe()` on this transport satisfies
//! the "deliverable after subscribe returns" contract.
//!
//! ## Message delivery semantics
//!
//! Payloads are published as raw bytes; the channel name is the Redis
//! channel. Incoming messages are fanned out to every local inbox
//! registered for that channel. Delivery is best-effort and non-durable,
//! exactly as Redis Pub/Sub itself.

use futures_util::StreamExt;

use redis::aio::{MultiplexedConnection, PubSubSink, PubSubStream};

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    log_warn,
    Channel,
    Envelope,
    Result,
    RpcError,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

const INBOX_CAPACITY: usize = 64;

type SubscriberMap = Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Envelope>>>>>;

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        channel: String,
        payload: Bytes,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        channels: Vec<String>,
        resp: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        channels: Vec<String>,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

enum ActorStep {
    //
    Continue,
    Stop,
}

impl Cmd {
    // ---

    /// Dispatches an actor command to the correct handler on the actor.
    async fn handle(self, actor: &mut RedisActor) -> ActorStep {
        // ---

        match self {
            Cmd::Publish {
                channel,
                payload,
                resp,
            } => {
                let result = actor.handle_publish(channel, payload).await;
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::Subscribe { channels, resp } => {
                let result = actor.handle_subscribe(channels).await;
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::Unsubscribe { channels, resp } => {
                let result = actor.handle_unsubscribe(channels).await;
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::Close { resp } => {
                log_debug!("{}: disconnecting redis client", actor.transport_id);
                let _ = resp.send(Ok(()));
                ActorStep::Stop
            }
        }
    }
}

/// Redis Pub/Sub implementation of the `Transport` trait.
pub struct RedisTransport {
    // ---
    base: TransportBase,
    cmd_tx: mpsc::Sender<Cmd>,
    subscribers: SubscriberMap,
    actor: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

impl RedisTransport {
    // ---

    /// Wraps already-established connections and starts the actor.
    fn create(
        base: TransportBase,
        publish_conn: MultiplexedConnection,
        pubsub_sink: PubSubSink,
        pubsub_stream: PubSubStream,
    ) -> TransportPtr {
        // ---

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = Arc::new(Notify::new());

        let actor = RedisActor {
            transport_id: base.transport_id.clone(),
            publish_conn,
            pubsub_sink,
            pubsub_stream,
            cmd_rx,
            subscribers: Arc::clone(&subscribers),
            shutdown: Arc::clone(&shutdown),
        };

        let handle = tokio::spawn(actor.run());

        Arc::new(Self {
            base,
            cmd_tx,
            subscribers,
            actor: Mutex::new(Some(handle)),
            shutdown,
        })
    }

    async fn call<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Cmd,
    {
        // ---
        let (tx, rx) = oneshot::channel();

        self.cmd_tx.send(make(tx)).await.map_err(|e| {
            RpcError::Transport(format!("actor command channel closed:{e}"))
        })?;

        rx.await.map_err(|e| {
            RpcError::Transport(format!("actor responder channel read failed:{e}"))
        })?
    }
}

struct RedisActor {
    // ---
    transport_id: String, // for logging only
    publish_conn: MultiplexedConnection,
    pubsub_sink: PubSubSink,
    pubsub_stream: PubSubStream,
    cmd_rx: mpsc::Receiver<Cmd>,
    subscribers: SubscriberMap,
    shutdown: Arc<Notify>,
}

impl RedisActor {
    // ---

    async fn run(mut self) {
        // ---

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(cmd.handle(&mut self).await, ActorStep::Stop) {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                maybe_msg = self.pubsub_stream.next() => {
                    match maybe_msg {
                        Some(msg) => self.handle_incoming(msg).await,
                        None => {
                            // No reconnect: inboxes close and pending
                            // requests resolve through their deadlines.
                            log_error!("{}: pubsub stream ended", self.transport_id);
                            break;
                        }
                    }
                }

                _ = self.shutdown.notified() => {
                    break;
                }
            }
        }

        // Dropping the senders closes every local inbox.
        self.subscribers.write().await.clear();
        log_debug!("{}: redis actor stopped", self.transport_id);
    }

    /// Issues a Redis PUBLISH on the dedicated multiplexed connection.
    async fn handle_publish(&mut self, channel: String, payload: Bytes) -> Result<()> {
        // ---

        redis::cmd("PUBLISH")
            .arg(&channel)
            .arg(payload.as_ref())
            .query_async::<i64>(&mut self.publish_conn)
            .await
            .map(|receivers| {
                log_debug!(
                    "{}: published to {channel}, {receivers} receivers",
                    self.transport_id
                );
            })
            .map_err(|err| {
                let msg = format!(
                    "{}: publish failed for channel {channel}: {err}",
                    self.transport_id
                );
                log_error!("{msg}");
                RpcError::Transport(msg)
            })
    }

    /// Registers broker subscriptions, one channel at a time.
    async fn handle_subscribe(&mut self, channels: Vec<String>) -> Result<()> {
        // ---

        for channel in channels {
            if let Err(err) = self.pubsub_sink.subscribe(&channel).await {
                let msg = format!(
                    "{}: failed to subscribe to channel {channel}: {err}",
                    self.transport_id
                );
                log_error!("{msg}");
                return Err(RpcError::Transport(msg));
            }
            log_info!("{}: subscribed to channel {channel}", self.transport_id);
        }
        Ok(())
    }

    async fn handle_unsubscribe(&mut self, channels: Vec<String>) -> Result<()> {
        // ---

        for channel in channels {
            self.subscribers.write().await.remove(&channel);

            if let Err(err) = self.pubsub_sink.unsubscribe(&channel).await {
                let msg = format!(
                    "{}: failed to unsubscribe from channel {channel}: {err}",
                    self.transport_id
                );
                log_warn!("{msg}");
                return Err(RpcError::Transport(msg));
            }
            log_debug!("{}: unsubscribed from channel {channel}", self.transport_id);
        }
        Ok(())
    }

    /// Fans an incoming message out to local inboxes for its channel.
    ///
    /// Inboxes that are full or closed are evicted.
    async fn handle_incoming(&self, msg: redis::Msg) {
        // ---

        let channel = msg.get_channel_name().to_string();

        let payload: Vec<u8> = match msg.get_payload() {
            Ok(p) => p,
            Err(err) => {
                log_debug!(
                    "{}: failed to read payload on channel {channel}: {err}",
                    self.transport_id
                );
                return;
            }
        };

        let senders = {
            let map = self.subscribers.read().await;
            map.get(&channel).cloned()
        };

        let Some(senders) = senders else {
            return;
        };

        let env = Envelope {
            channel: Channel::from(channel.as_str()),
            payload: Bytes::from(payload),
        };

        if fan_out(&self.transport_id, &senders, &env) {
            let mut map = self.subscribers.write().await;
            if let Some(list) = map.get_mut(&channel) {
                list.retain(|tx| !tx.is_closed());
                if list.is_empty() {
                    map.remove(&channel);
                }
            }
        }
    }
} // RedisActor

#[async_trait::async_trait]
impl Transport for RedisTransport {
    // ---

    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, channel: &Channel, payload: Bytes) -> Result<()> {
        // ---
        let channel = channel.as_str().to_string();
        self.call(|resp| Cmd::Publish {
            channel,
            payload,
            resp,
        })
        .await
    }

    async fn subscribe(&self, channels: &[Channel]) -> Result<SubscriptionHandle> {
        // ---
        let names: Vec<String> = channels.iter().map(|c| c.as_str().to_string()).collect();

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        {
            let mut map = self.subscribers.write().await;
            for name in &names {
                map.entry(name.clone()).or_default().push(tx.clone());
            }
        }

        self.call(|resp| Cmd::Subscribe {
            channels: names,
            resp,
        })
        .await?;

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn unsubscribe(&self, channels: &[Channel]) -> Result<()> {
        // ---
        let names: Vec<String> = channels.iter().map(|c| c.as_str().to_string()).collect();
        self.call(|resp| Cmd::Unsubscribe {
            channels: names,
            resp,
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();

        if self.cmd_tx.send(Cmd::Close { resp: tx }).await.is_ok() {
            let _ = rx.await;
        } else {
            self.shutdown.notify_waiters();
        }

        if let Some(handle) = self.actor.lock().await.take() {
            let _ = handle.await;
        }

        Ok(())
    }
}

/// Deliver `env` to every inbox without blocking the actor.
///
/// A full inbox loses this one message and stays registered. Returns `true`
/// if any inbox was found closed, so the caller can prune the channel.
fn fan_out(transport_id: &str, senders: &[mpsc::Sender<Envelope>], env: &Envelope) -> bool {
    // ---
    let mut saw_closed = false;

    for tx in senders {
        match tx.try_send(env.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                log_warn!(
                    "{transport_id}: inbox full on channel {}, dropping message",
                    env.channel
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log_debug!(
                    "{transport_id}: inbox closed on channel {}, removing",
                    env.channel
                );
                saw_closed = true;
            }
        }
    }

    saw_closed
}

/// Creates a Redis Pub/Sub transport from the given configuration.
///
/// # Errors
///
/// Returns an error if:
/// - Neither a broker URI nor a host/port is configured, or the URI cannot be parsed
/// - Connection to the Redis broker fails (both connections are eager)
pub async fn create_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---

    let Some(uri) = config.broker_uri() else {
        return Err(RpcError::MissingConfig(
            "redis transport requires a uri or host".to_string(),
        ));
    };

    let client = redis::Client::open(uri.as_str()).map_err(|err| {
        let msg = format!("redis: failed to open client for URI {uri}: {err}");
        log_error!("{msg}");
        RpcError::Transport(msg)
    })?;

    let publish_conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|err| {
            let msg = format!("redis: failed to connect publish connection to {uri}: {err}");
            log_error!("{msg}");
            RpcError::Transport(msg)
        })?;

    let (pubsub_sink, pubsub_stream) = client
        .get_async_pubsub()
        .await
        .map_err(|err| {
            let msg = format!("redis: failed to connect pubsub connection to {uri}: {err}");
            log_error!("{msg}");
            RpcError::Transport(msg)
        })?
        .split();

    log_info!("{}: connected to Redis broker at {uri}", config.node_id);

    Ok(RedisTransport::create(
        TransportBase::from(&config),
        publish_conn,
        pubsub_sink,
        pubsub_stream,
    ))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn envelope(payload: &'static [u8]) -> Envelope {
        Envelope {
            channel: Channel::from("reply.test"),
            payload: Bytes::from_static(payload),
        }
    }

    #[tokio::test]
    async fn test_full_inbox_drops_message_but_stays_subscribed() {
        // ---
        let (tx, mut rx) = mpsc::channel(1);
        let senders = vec![tx];

        assert!(!fan_out("t", &senders, &envelope(b"first")));
        assert!(!fan_out("t", &senders, &envelope(b"overflow")));

        assert_eq!(rx.recv().await.unwrap().payload.as_ref(), b"first");

        assert!(!fan_out("t", &senders, &envelope(b"after")));
        assert_eq!(rx.recv().await.unwrap().payload.as_ref(), b"after");
    }

    #[tokio::test]
    async fn test_closed_inbox_is_reported_for_removal() {
        // ---
        let (open_tx, mut open_rx) = mpsc::channel(4);
        let (closed_tx, closed_rx) = mpsc::channel(4);
        drop(closed_rx);

        let senders = vec![closed_tx, open_tx];
        assert!(fan_out("t", &senders, &envelope(b"x")));

        assert_eq!(open_rx.recv().await.unwrap().payload.as_ref(), b"x");
        assert!(senders[0].is_closed());
        assert!(!senders[1].is_closed());
    }
}
