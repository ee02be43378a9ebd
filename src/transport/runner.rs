//! Transport receive loop.
//!
//! Glue between a [`Transport`](crate::Transport) and the roles that consume
//! from it: the responder (request channels) and the requester (its reply
//! channel).
//!
//! The runner:
//! - subscribes using the consumer-provided channel list
//! - spawns one task that drains the subscription inbox
//! - hands each envelope to the consumer, one at a time
//! - logs consumer errors without stopping the loop
//!
//! It does not define RPC semantics or impose retry or timeout policies.
//! Because envelopes are handed over strictly one after another, a consumer
//! sees inbound messages as discrete events processed to completion.
//! Consumers that need to do slow work (the responder awaiting a handler)
//! spawn it and return immediately.
//!
//! The loop ends when the inbox closes, which happens when the consumer's
//! channels are unsubscribed or the transport is closed.

use crate::{log_debug, log_warn, Channel, Envelope, Result, TransportPtr};
use tokio::task::JoinHandle;

/// A consumer of bus-delivered envelopes.
///
/// Implementations should assume that envelopes may be duplicated, and
/// that envelopes from different channels may arrive in any relative order.
#[async_trait::async_trait]
pub(crate) trait TransportConsumer: Send + Sync {
    /// Channels to subscribe to.
    fn channels(&self) -> Vec<Channel>;

    /// Handle a single incoming envelope.
    ///
    /// Returning an error drops that envelope; the loop continues.
    async fn handle_envelope(&self, env: Envelope) -> Result<()>;
}

/// Subscribe `consumer` to its channels and start its receive loop.
///
/// Returns once the subscription is registered, so that anything published
/// afterwards on those channels reaches the consumer.
pub(crate) async fn run<T>(transport: TransportPtr, consumer: T) -> Result<JoinHandle<()>>
where
    T: TransportConsumer + 'static,
{
    // ---
    let channels = consumer.channels();
    let mut handle = transport.subscribe(&channels).await?;
    let transport_id = transport.transport_id().to_string();

    log_debug!("{transport_id}: receive loop started for {channels:?}");

    let join = tokio::spawn(async move {
        // ---
        while let Some(env) = handle.inbox.recv().await {
            let channel = env.channel.clone();
            if let Err(err) = consumer.handle_envelope(env).await {
                log_warn!("{transport_id}: dropped message on {channel}: {err}");
            }
        }
        log_debug!("{transport_id}: subscription closed, receive loop stopped");
    });

    Ok(join)
}
