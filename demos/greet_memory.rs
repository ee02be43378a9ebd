//! Greeter over the in-process bus.
//!
//! A responder serves `greet.hello` on channel `svc.greeter` (prefix
//! `greet.`); a requester routes `hello` there and prints the reply.
//!
//! Run with: cargo run --example greet_memory
//!
//! Set `RUST_LOG=pubsub_rpc=debug` to watch the request span.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use pubsub_rpc::{
    //
    create_memory_transport,
    Context,
    HandlerRegistry,
    RemoteError,
    Requester,
    RequesterConfig,
    Responder,
    ResponderConfig,
    Result,
    TransportConfig,
};

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    who: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Greeting {
    msg: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let registry = Arc::new(HandlerRegistry::new());
    registry.reply_typed("greet.hello", |_ctx, req: Hello| async move {
        if req.who.is_empty() {
            return Err(RemoteError::new("ValidationError", "who must not be empty"));
        }
        Ok(Greeting {
            msg: format!("hi {}", req.who),
        })
    });

    let server_config = TransportConfig::memory("greeter");
    let responder = Responder::new(
        create_memory_transport(server_config.clone()).await?,
        registry,
        ResponderConfig::new(server_config).with_subscription("svc.greeter", "greet."),
    );
    responder.initialize().await?;

    let client_config = TransportConfig::memory("client");
    let requester = Requester::new(
        create_memory_transport(client_config.clone()).await?,
        RequesterConfig::new(client_config, "reply.client.1")
            .with_default_ttl(Duration::from_secs(2))
            .with_name_route("hello", "svc.greeter"),
    )?;
    requester.initialize().await?;

    let ctx = Context::new().with_data("tenant", "demo");
    let greeting: Greeting = requester
        .request_to(&ctx, "hello", Hello { who: "Ann".into() })
        .await?;
    println!("{}", greeting.msg);

    match requester
        .request_to::<_, Greeting>(&ctx, "hello", Hello { who: String::new() })
        .await
    {
        Ok(greeting) => println!("unexpected: {}", greeting.msg),
        Err(err) => println!("rejected: {err}"),
    }

    requester.terminate().await?;
    responder.terminate().await?;
    Ok(())
}
