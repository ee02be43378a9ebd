//! Responding side: request dispatch and reply publication.
//!
//! A [`Responder`] subscribes to a set of channels, each mapped to a name
//! prefix. For every decodable request it rebuilds a [`Context`], runs the
//! handler registered for `prefix + name`, and publishes exactly one reply
//! to the request's reply channel.
//!
//! Malformed requests are dropped without a reply: their reply channel
//! cannot be trusted. Reply publication is best-effort; a failed publish is
//! logged and the caller resolves through its own deadline.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::protocol::{ReplyMessage, RequestMessage};
use crate::transport::runner::{self, TransportConsumer};
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Channel,
    Context,
    Envelope,
    HandlerRegistry,
    ResponderConfig,
    Result,
    TransportPtr,
};

/// Serves registered handlers to requests arriving over the bus.
#[derive(Clone)]
pub struct Responder {
    inner: Arc<Inner>,
}

struct Inner {
    transport: TransportPtr,
    registry: Arc<HandlerRegistry>,
    prefixes: Arc<BTreeMap<Channel, String>>,
    rx_task: Mutex<Option<JoinHandle<()>>>,
}

impl Responder {
    // ---

    /// Create a responder on an existing transport.
    ///
    /// Nothing is subscribed until [`initialize`](Self::initialize).
    pub fn new(
        transport: TransportPtr,
        registry: Arc<HandlerRegistry>,
        config: ResponderConfig,
    ) -> Self {
        // ---
        let prefixes = config
            .subscriptions
            .into_iter()
            .map(|(channel, prefix)| (Channel::from(channel), prefix))
            .collect();

        Self {
            inner: Arc::new(Inner {
                transport,
                registry,
                prefixes: Arc::new(prefixes),
                rx_task: Mutex::new(None),
            }),
        }
    }

    /// Create the transport described by `config` and a responder on it.
    pub async fn connect(config: ResponderConfig, registry: Arc<HandlerRegistry>) -> Result<Self> {
        // ---
        let transport = crate::create_transport(&config.transport).await?;
        Ok(Self::new(transport, registry, config))
    }

    /// Subscribe to the configured channels and start serving requests.
    ///
    /// With no configured subscriptions this is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        // ---
        let transport_id = self.inner.transport.transport_id();

        if self.inner.prefixes.is_empty() {
            log_info!("{transport_id}: responder has no subscriptions");
            return Ok(());
        }

        let consumer = RequestConsumer {
            transport: self.inner.transport.clone(),
            registry: self.inner.registry.clone(),
            prefixes: self.inner.prefixes.clone(),
        };

        let task = runner::run(self.inner.transport.clone(), consumer).await?;

        let previous = self
            .inner
            .rx_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }

        log_info!(
            "{transport_id}: responder serving {} channels",
            self.inner.prefixes.len()
        );
        Ok(())
    }

    /// Unsubscribe from every channel and release the bus connection.
    ///
    /// Handlers already running still publish their replies if the
    /// transport allows it.
    pub async fn terminate(&self) -> Result<()> {
        // ---
        let channels: Vec<Channel> = self.inner.prefixes.keys().cloned().collect();
        let unsubscribed = if channels.is_empty() {
            Ok(())
        } else {
            self.inner.transport.unsubscribe(&channels).await
        };

        let task = self
            .inner
            .rx_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }

        self.inner.transport.close().await?;
        unsubscribed
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    /// Subscribed channels.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.inner.prefixes.keys()
    }
}

struct RequestConsumer {
    transport: TransportPtr,
    registry: Arc<HandlerRegistry>,
    prefixes: Arc<BTreeMap<Channel, String>>,
}

#[async_trait::async_trait]
impl TransportConsumer for RequestConsumer {
    fn channels(&self) -> Vec<Channel> {
        self.prefixes.keys().cloned().collect()
    }

    /// Decode and hand off; the handler runs on its own task so that a slow
    /// handler does not hold up the channel.
    async fn handle_envelope(&self, env: Envelope) -> Result<()> {
        // ---
        let msg = RequestMessage::decode(&env.payload)?;

        let prefix = self
            .prefixes
            .get(&env.channel)
            .map(String::as_str)
            .unwrap_or("");
        let name = format!("{prefix}{}", msg.name);

        let ctx = Context::from_request(&msg);
        let span = ctx.span().clone();

        tokio::spawn(
            dispatch(
                self.transport.clone(),
                self.registry.clone(),
                ctx,
                name,
                msg,
            )
            .instrument(span),
        );

        Ok(())
    }
}

/// Run the handler for one request and publish its single reply.
async fn dispatch(
    transport: TransportPtr,
    registry: Arc<HandlerRegistry>,
    ctx: Context,
    name: String,
    msg: RequestMessage,
) {
    // ---
    let RequestMessage {
        reply_channel,
        request_id,
        payload,
        ..
    } = msg;

    log_debug!("dispatching {name}");

    let reply = match registry.request(ctx, &name, payload).await {
        Ok(data) => ReplyMessage::success(request_id, data),
        Err(err) => {
            log_warn!("{name} failed: {err}");
            ReplyMessage::failure(request_id, err)
        }
    };

    let bytes = match reply.encode() {
        Ok(bytes) => bytes,
        Err(err) => {
            log_error!("failed to encode reply for {name}: {err}");
            return;
        }
    };

    let reply_channel = Channel::from(reply_channel);
    if let Err(err) = transport.publish(&reply_channel, bytes).await {
        log_error!("failed to publish reply to {reply_channel}: {err}");
    }
}
