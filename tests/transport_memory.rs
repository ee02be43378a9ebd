// tests/transport_memory.rs

use bytes::Bytes;
use tokio::time::{timeout, Duration};

use pubsub_rpc::{
    // ---
    Channel,
    MemoryHub,
    ReplyMessage,
    RequestId,
    TransportBuilder,
    TransportConfig,
};

#[tokio::test]
async fn memory_subscribe_then_publish_delivers() {
    // ---
    // Arrange
    // ---
    let hub = MemoryHub::new();

    let transport =
        pubsub_rpc::create_memory_transport_with_hub(TransportConfig::memory("mstpd"), hub)
            .await
            .expect("failed to create memory transport");

    let channel = Channel::from("test.channel");

    let mut sub = transport
        .subscribe(&[channel.clone()])
        .await
        .expect("subscribe failed");

    let payload = ReplyMessage::success(RequestId::generate(), None)
        .encode()
        .expect("encode failed");

    // ---
    // Act
    // ---
    transport
        .publish(&channel, payload.clone())
        .await
        .expect("publish failed");

    // ---
    // Assert
    // ---
    let received = timeout(Duration::from_millis(100), sub.inbox.recv())
        .await
        .expect("timed out waiting for message")
        .expect("subscription channel closed unexpectedly");

    assert_eq!(received.payload, payload);
    assert_eq!(received.channel, channel);
}

#[tokio::test]
async fn memory_publish_without_subscribers_is_not_an_error() {
    // ---
    let transport = TransportBuilder::new()
        .node_id("lonely")
        .transport_type("memory")
        .build()
        .await
        .expect("failed to build memory transport");

    transport
        .publish(&Channel::from("nobody.listens"), Bytes::from_static(b"[]"))
        .await
        .expect("publish failed");
}

#[tokio::test]
async fn memory_preserves_publish_order_per_channel() {
    // ---
    let hub = MemoryHub::new();
    let sender =
        pubsub_rpc::create_memory_transport_with_hub(TransportConfig::memory("tx"), hub.clone())
            .await
            .unwrap();
    let receiver = pubsub_rpc::create_memory_transport_with_hub(TransportConfig::memory("rx"), hub)
        .await
        .unwrap();

    let channel = Channel::from("ordered");
    let mut sub = receiver.subscribe(&[channel.clone()]).await.unwrap();

    for i in 0..10u8 {
        sender.publish(&channel, Bytes::from(vec![i])).await.unwrap();
    }

    for i in 0..10u8 {
        let env = timeout(Duration::from_millis(100), sub.inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.payload.as_ref(), &[i]);
    }
}

#[tokio::test]
async fn memory_unsubscribe_closes_inbox() {
    // ---
    let hub = MemoryHub::new();
    let transport = pubsub_rpc::create_memory_transport_with_hub(TransportConfig::memory("u"), hub)
        .await
        .unwrap();

    let channel = Channel::from("short.lived");
    let mut sub = transport.subscribe(&[channel.clone()]).await.unwrap();

    transport.unsubscribe(&[channel]).await.unwrap();

    let next = timeout(Duration::from_millis(100), sub.inbox.recv())
        .await
        .expect("inbox should close, not hang");
    assert!(next.is_none());
}
