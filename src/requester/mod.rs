//! Requesting side: identity, deadlines and reply correlation.
//!
//! A [`Requester`] publishes requests to destination channels and listens on
//! its own reply channel. Every request sent gets a pending entry holding the
//! caller's completion and a deadline timer. The entry is resolved by exactly
//! one of:
//!
//! - the first reply that names its id, which cancels the timer, or
//! - the timer firing, which reports [`RpcError::Timeout`].
//!
//! Removal from the pending table is the single decision point between the
//! two, so a late reply or a stale timer finds nothing and is a no-op.

mod pending;
mod routes;

pub use pending::Completion;

use pending::PendingRequests;
use routes::RouteTable;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::protocol::{now_ms, ReplyMessage, RequestMessage};
use crate::transport::runner::{self, TransportConsumer};
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    Channel,
    Context,
    Envelope,
    HandlerRegistry,
    RequestId,
    RequesterConfig,
    Result,
    RpcError,
    TransportPtr,
};

type SharedPending = Arc<Mutex<PendingRequests>>;

/// Originates requests and correlates their replies.
///
/// Cheap to clone; clones share the pending table and the bus connection.
#[derive(Clone)]
pub struct Requester {
    inner: Arc<Inner>,
}

struct Inner {
    transport: TransportPtr,
    reply_channel: Channel,
    default_ttl: Duration,
    routes: RouteTable,
    pending: SharedPending,
    rx_task: Mutex<Option<JoinHandle<()>>>,
}

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Requester {
    // ---

    /// Create a requester on an existing transport.
    ///
    /// Nothing is subscribed until [`initialize`](Self::initialize).
    ///
    /// # Errors
    ///
    /// Fails if the reply channel is empty or a route pattern is invalid.
    pub fn new(transport: TransportPtr, config: RequesterConfig) -> Result<Self> {
        // ---
        config.validate()?;
        let routes = RouteTable::build(&config.names, &config.patterns)?;

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                reply_channel: Channel::from(config.reply_channel.as_str()),
                default_ttl: config.default_ttl(),
                routes,
                pending: Arc::new(Mutex::new(PendingRequests::new())),
                rx_task: Mutex::new(None),
            }),
        })
    }

    /// Create the transport described by `config` and a requester on it.
    pub async fn connect(config: RequesterConfig) -> Result<Self> {
        // ---
        let transport = crate::create_transport(&config.transport).await?;
        Self::new(transport, config)
    }

    /// Subscribe to the reply channel and start correlating replies.
    pub async fn initialize(&self) -> Result<()> {
        // ---
        let consumer = ReplyConsumer {
            reply_channel: self.inner.reply_channel.clone(),
            pending: Arc::clone(&self.inner.pending),
        };

        let task = runner::run(self.inner.transport.clone(), consumer).await?;

        if let Some(previous) = lock_ignore_poison(&self.inner.rx_task).replace(task) {
            previous.abort();
        }

        log_info!(
            "{}: requester listening on {}",
            self.inner.transport.transport_id(),
            self.inner.reply_channel
        );
        Ok(())
    }

    /// Bind every configured route into `registry`.
    ///
    /// A local request for a routed name (or a name matching a routed
    /// pattern) is forwarded with [`send`](Self::send) to the route's
    /// channel. Failures reach the local caller as the remote error, or as
    /// a `TimeoutError` when no reply arrived.
    pub fn register_handlers(&self, registry: &HandlerRegistry) -> Result<()> {
        // ---
        for (name, channel) in &self.inner.routes.names {
            let requester = self.clone();
            let channel = channel.clone();
            let route_name = name.clone();

            registry.reply(name.clone(), move |ctx, payload| {
                let requester = requester.clone();
                let channel = channel.clone();
                let name = route_name.clone();
                async move {
                    requester
                        .send(&channel, &ctx, &name, payload)
                        .await
                        .map_err(RpcError::into_remote)
                }
            });
        }

        for route in &self.inner.routes.patterns {
            let requester = self.clone();
            let channel = route.channel.clone();

            registry.reply_pattern(&route.source, move |ctx, name, payload| {
                let requester = requester.clone();
                let channel = channel.clone();
                async move {
                    requester
                        .send(&channel, &ctx, &name, payload)
                        .await
                        .map_err(RpcError::into_remote)
                }
            })?;
        }

        Ok(())
    }

    /// Send a request and hand its outcome to `completion`.
    ///
    /// The id is taken from `ctx` when present, otherwise generated. The
    /// time to wait is the context's remaining time to its deadline, or the
    /// configured default ttl. `completion` runs exactly once, with the
    /// reply data, the remote error, [`RpcError::Timeout`], or
    /// [`RpcError::Terminated`].
    ///
    /// A failed publish is logged and the request is left to time out.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateRequest`] if the id is already pending
    /// here; in that case nothing is published and `completion` is dropped
    /// without being called.
    pub async fn send_with_callback(
        &self,
        channel: &Channel,
        ctx: &Context,
        name: &str,
        payload: Value,
        completion: Completion,
    ) -> Result<RequestId> {
        // ---
        let id = ctx.id().cloned().unwrap_or_else(RequestId::generate);
        let now = now_ms();
        let ttl = match ctx.deadline_ms() {
            Some(deadline) => Duration::from_millis(deadline.saturating_sub(now).max(0) as u64),
            None => self.inner.default_ttl,
        };

        let msg = RequestMessage {
            reply_channel: self.inner.reply_channel.to_string(),
            request_id: id.clone(),
            name: name.to_string(),
            expiry: now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)),
            context_data: ctx.data().clone(),
            payload,
        };
        let bytes = msg.encode()?;

        {
            let timer_pending = Arc::clone(&self.inner.pending);
            let timer_id = id.clone();

            lock_ignore_poison(&self.inner.pending).insert(id.clone(), ttl, completion, |seq| {
                tokio::spawn(async move {
                    tokio::time::sleep(ttl).await;
                    on_timeout(&timer_pending, &timer_id, seq);
                })
                .abort_handle()
            })?;
        }

        log_debug!("sending {name} as {id} to {channel}, ttl {ttl:?}");

        if let Err(err) = self.inner.transport.publish(channel, bytes).await {
            log_error!("failed to publish request {id} to {channel}: {err}");
        }

        Ok(id)
    }

    /// Send a request to `channel` and wait for its outcome.
    ///
    /// `Ok(None)` means the handler produced no result.
    pub async fn send(
        &self,
        channel: &Channel,
        ctx: &Context,
        name: &str,
        payload: Value,
    ) -> Result<Option<Value>> {
        // ---
        let (tx, rx) = oneshot::channel();

        self.send_with_callback(
            channel,
            ctx,
            name,
            payload,
            Box::new(move |outcome| {
                // Receiver gone means the caller stopped waiting.
                let _ = tx.send(outcome);
            }),
        )
        .await?;

        rx.await.map_err(|_| RpcError::Terminated)?
    }

    /// Send a request to the channel configured for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::NoRoute`] when no name or pattern route matches.
    pub async fn request(&self, ctx: &Context, name: &str, payload: Value) -> Result<Option<Value>> {
        // ---
        let channel = self
            .inner
            .routes
            .resolve(name)
            .cloned()
            .ok_or_else(|| RpcError::NoRoute(name.to_string()))?;

        self.send(&channel, ctx, name, payload).await
    }

    /// Typed variant of [`request`](Self::request).
    ///
    /// A reply without data deserializes from `null`, so `TResp` should be
    /// an `Option` or `()` for handlers that may return nothing.
    pub async fn request_to<TReq, TResp>(&self, ctx: &Context, name: &str, req: TReq) -> Result<TResp>
    where
        TReq: Serialize,
        TResp: DeserializeOwned,
    {
        // ---
        let payload = serde_json::to_value(req)?;
        let data = self.request(ctx, name, payload).await?;
        Ok(serde_json::from_value(data.unwrap_or(Value::Null))?)
    }

    /// Stop listening for replies and release the bus connection.
    ///
    /// Requests still pending are failed with [`RpcError::Terminated`]
    /// right away rather than left to run out their deadlines.
    pub async fn terminate(&self) -> Result<()> {
        // ---
        let unsubscribed = self
            .inner
            .transport
            .unsubscribe(std::slice::from_ref(&self.inner.reply_channel))
            .await;

        if let Some(task) = lock_ignore_poison(&self.inner.rx_task).take() {
            task.abort();
        }

        let outstanding = lock_ignore_poison(&self.inner.pending).drain();
        if !outstanding.is_empty() {
            log_info!("failing {} pending requests on terminate", outstanding.len());
        }
        for entry in outstanding {
            entry.complete(Err(RpcError::Terminated));
        }

        self.inner.transport.close().await?;
        unsubscribed
    }

    /// Number of requests still waiting for a reply or deadline.
    pub fn pending_len(&self) -> usize {
        lock_ignore_poison(&self.inner.pending).len()
    }

    pub fn reply_channel(&self) -> &Channel {
        &self.inner.reply_channel
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }
}

/// Drains the reply channel into the pending table.
struct ReplyConsumer {
    reply_channel: Channel,
    pending: SharedPending,
}

#[async_trait::async_trait]
impl TransportConsumer for ReplyConsumer {
    fn channels(&self) -> Vec<Channel> {
        vec![self.reply_channel.clone()]
    }

    async fn handle_envelope(&self, env: Envelope) -> Result<()> {
        on_reply(&self.pending, &env.payload)
    }
}

/// Resolve the pending request named by a reply, if it is still waiting.
///
/// A malformed reply is an error (the request keeps waiting for its
/// timer). A reply for an unknown or already resolved id is ignored.
fn on_reply(pending: &Mutex<PendingRequests>, bytes: &[u8]) -> Result<()> {
    // ---
    let reply = ReplyMessage::decode(bytes)?;

    let entry = lock_ignore_poison(pending).take(&reply.request_id);

    match entry {
        Some(entry) => {
            log_debug!(
                "reply for {} after {:?} (ttl {:?})",
                reply.request_id,
                entry.elapsed(),
                entry.ttl()
            );
            let outcome = match reply.error {
                Some(err) => Err(RpcError::Remote(err)),
                None => Ok(reply.data),
            };
            entry.complete(outcome);
        }
        None => {
            log_debug!(
                "no pending request for {}: late, duplicate or foreign reply",
                reply.request_id
            );
        }
    }

    Ok(())
}

/// Fail the request armed with `seq` if no reply has resolved it yet.
fn on_timeout(pending: &Mutex<PendingRequests>, id: &RequestId, seq: u64) {
    // ---
    let entry = lock_ignore_poison(pending).take_armed(id, seq);

    if let Some(entry) = entry {
        log_debug!("request {id} timed out after {:?}", entry.ttl());
        entry.complete(Err(RpcError::Timeout));
    }
}
