//! `Loom`: handler registration, server push and the axum integration.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::{self, Future};
use std::io;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::{Client, ClientId, ConnectOptions};
use crate::config::LoomConfig;
use crate::connections::ConnectionRegistry;
use crate::framing;
use crate::health::{self, HealthResponse};
use crate::protocol::{self, Message};
use crate::registry::{HandlerRegistry, IntoReply, WantsClient};
use crate::session::run_session;

/// Lifecycle hook invoked with the affected client.
pub type Hook = Arc<dyn Fn(&Arc<Client>) + Send + Sync>;

/// The RPC router.
///
/// Register handlers and hooks on an owned `Loom`, then wrap it in an `Arc`
/// to serve connections. Once shared the handler table is read-only.
pub struct Loom {
    config: LoomConfig,
    handlers: HandlerRegistry,
    connections: ConnectionRegistry,
    on_connect: Option<Hook>,
    on_disconnect: Option<Hook>,
    shutdown: CancellationToken,
    start_time: Instant,
}

impl Loom {
    /// Create a router with no handlers.
    pub fn new(config: LoomConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::new(),
            connections: ConnectionRegistry::new(),
            on_connect: None,
            on_disconnect: None,
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
        }
    }

    /// Router configuration.
    pub fn config(&self) -> &LoomConfig {
        &self.config
    }

    /// Registered handlers.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Register `f` as the handler for `route`.
    ///
    /// ```ignore
    /// loom.register_handler("echo", |req: Text| async move { Ok::<_, String>(req) });
    /// ```
    pub fn register_handler<F, Fut, Req, R>(&mut self, route: &str, f: F)
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
        R: IntoReply + Send + 'static,
    {
        self.handlers.register(route, f);
    }

    /// Register `f` for `route`; each request receives the calling client
    /// through [`WantsClient`].
    pub fn register_handler_with_client<F, Fut, Req, R>(&mut self, route: &str, f: F)
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        Req: DeserializeOwned + WantsClient + Send + 'static,
        R: IntoReply + Send + 'static,
    {
        self.handlers.register_with_client(route, f);
    }

    /// Call `hook` after a client is registered, before its first request.
    pub fn on_connect(&mut self, hook: impl Fn(&Arc<Client>) + Send + Sync + 'static) {
        self.on_connect = Some(Arc::new(hook));
    }

    /// Call `hook` when a session ends, before the client is unregistered.
    pub fn on_disconnect(&mut self, hook: impl Fn(&Arc<Client>) + Send + Sync + 'static) {
        self.on_disconnect = Some(Arc::new(hook));
    }

    /// Push `method` with `data` to every broadcast-eligible client.
    ///
    /// The message is encoded once. Returns how many client queues accepted
    /// it; clients with a full queue are skipped.
    pub fn broadcast<T: Serialize + ?Sized>(&self, method: &str, data: &T) -> usize {
        let message = Message::push(method, protocol::encode_payload(data));
        let line: Arc<str> = Arc::from(protocol::encode(&message));
        self.connections.broadcast_line(&line)
    }

    /// Number of registered clients.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// A registered client by id.
    pub fn client(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.connections.get(id)
    }

    /// Snapshot of all registered clients.
    pub fn clients(&self) -> Vec<Arc<Client>> {
        self.connections.snapshot()
    }

    /// End every session. New upgrades are refused from now on.
    pub fn shutdown(&self) {
        info!(connections = self.connection_count(), "shutting down loom");
        self.shutdown.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Current health snapshot.
    pub fn health(&self) -> HealthResponse {
        health::health_check(
            self.start_time,
            self.connection_count(),
            self.is_shutting_down(),
        )
    }

    /// Axum routes: the upgrade route at the configured path and `/health`.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(&self.config.path, get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.clone())
    }

    /// Serve an upgraded axum socket until the session ends.
    pub async fn serve_socket(self: Arc<Self>, socket: WebSocket, options: ConnectOptions) {
        let (ws_tx, ws_rx) = socket.split();
        let sink = ws_tx.with(|line: Arc<str>| {
            future::ready(Ok::<_, axum::Error>(WsMessage::Text(line.to_string().into())))
        });
        let frames = framing::websocket_frames(ws_rx);
        self.serve_transport(frames, sink, options).await;
    }

    /// Serve any transport given as a stream of frame payloads and a sink of
    /// encoded lines.
    pub async fn serve_transport<F, S>(self: Arc<Self>, frames: F, sink: S, options: ConnectOptions)
    where
        F: Stream<Item = io::Result<Bytes>>,
        S: Sink<Arc<str>> + Send + Unpin + 'static,
        S::Error: Display,
    {
        let lines = framing::line_reader(frames, self.config.max_line_bytes);
        run_session(&self, options, lines, sink).await;
    }

    pub(crate) fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub(crate) fn connect_hook(&self) -> Option<&Hook> {
        self.on_connect.as_ref()
    }

    pub(crate) fn disconnect_hook(&self) -> Option<&Hook> {
        self.on_disconnect.as_ref()
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

/// GET {path}: upgrade to a `WebSocket` session.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(loom): State<Arc<Loom>>,
) -> Response {
    if loom.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let options = ConnectOptions::from_query(params);
    ws.on_upgrade(move |socket| loom.serve_socket(socket, options))
}

/// GET /health
async fn health_handler(State(loom): State<Arc<Loom>>) -> Json<HealthResponse> {
    Json(loom.health())
}
