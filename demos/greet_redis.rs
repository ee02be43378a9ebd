//! Greeter over Redis Pub/Sub.
//!
//! Runs the responder and the requester as two connections to the same
//! broker, exactly as two processes would.
//!
//! Run with: cargo run --example greet_redis --features transport_redis
//!
//! Requires: a Redis server on localhost:6379, or `BROKER_URI` set.

use serde_json::{json, Value};
use std::sync::Arc;

use pubsub_rpc::{
    //
    Context,
    HandlerRegistry,
    Requester,
    RequesterConfig,
    Responder,
    ResponderConfig,
    Result,
    TransportConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let broker_uri =
        std::env::var("BROKER_URI").unwrap_or_else(|_| "redis://localhost:6379".to_string());

    let registry = Arc::new(HandlerRegistry::new());
    registry.reply("greet", |_ctx, payload: Value| async move {
        let who = payload["who"].as_str().unwrap_or("stranger").to_string();
        Ok(Some(json!({ "msg": format!("hi {who}") })))
    });

    let responder = Responder::connect(
        ResponderConfig::new(TransportConfig::with_broker(&broker_uri, "greeter"))
            .with_subscription("svc.greeter", ""),
        registry,
    )
    .await?;
    responder.initialize().await?;

    let requester = Requester::connect(
        RequesterConfig::new(
            TransportConfig::with_broker(&broker_uri, "client"),
            format!("reply.client.{}", std::process::id()),
        )
        .with_name_route("greet", "svc.greeter"),
    )
    .await?;
    requester.initialize().await?;

    let reply = requester
        .request(&Context::new(), "greet", json!({ "who": "Ann" }))
        .await?;
    println!("{}", reply.unwrap_or(Value::Null));

    requester.terminate().await?;
    responder.terminate().await?;
    Ok(())
}
