//! Demo routes and the periodic `tick` broadcast.

use std::sync::Arc;
use std::time::{Duration, Instant};

use loom_server::{Client, Loom, WantsClient};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Request of the `hello` route.
#[derive(Debug, Deserialize)]
pub struct HelloRequest {
    /// Who to greet.
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Calling client, set by the router.
    #[serde(skip)]
    pub client: Option<Arc<Client>>,
}

impl WantsClient for HelloRequest {
    fn set_client(&mut self, client: Arc<Client>) {
        self.client = Some(client);
    }
}

/// Reply of the `hello` route.
#[derive(Debug, PartialEq, Serialize)]
pub struct HelloReply {
    /// Greeting text.
    #[serde(rename = "Name")]
    pub name: String,
}

/// Payload of the `echo` route, returned unchanged.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct EchoText {
    /// Text to echo.
    #[serde(rename = "Text")]
    pub text: String,
}

/// Payload of `tick` broadcasts.
#[derive(Debug, Serialize)]
pub struct Tick {
    /// Sequence number, starting at 1.
    pub seq: u64,
    /// Seconds since the ticker started.
    pub uptime_secs: u64,
}

/// `hello`: greet the caller.
pub async fn hello(req: HelloRequest) -> Result<HelloReply, String> {
    if req.name.trim().is_empty() {
        return Err("name is required".into());
    }
    if let Some(client) = &req.client {
        info!(client_id = %client.id(), name = %req.name, "hello");
    }
    Ok(HelloReply {
        name: format!("Hello, {}", req.name),
    })
}

/// `echo`: return the payload.
pub async fn echo(req: EchoText) -> Result<EchoText, String> {
    Ok(req)
}

/// Register the demo routes.
pub fn register(loom: &mut Loom) {
    loom.register_handler_with_client("hello", hello);
    loom.register_handler("echo", echo);
}

/// Broadcast a `tick` every `interval` until `cancel` fires.
pub async fn run_ticker(loom: Arc<Loom>, interval: Duration, cancel: CancellationToken) {
    let start = Instant::now();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    let mut seq = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                seq += 1;
                let delivered = loom.broadcast("tick", &Tick {
                    seq,
                    uptime_secs: start.elapsed().as_secs(),
                });
                debug!(seq, delivered, "tick broadcast");
            }
        }
    }
}
