//! # loom-server
//!
//! Bidirectional RPC routing over persistent `WebSocket` connections.
//!
//! - Wire protocol: one JSON message per line (`id`, `method`, `data`, `error`)
//! - Handler registry: typed request decoding, optional client injection
//! - Per-connection session: read loop, single writer task, keepalive probe
//! - Server push: targeted [`Client::call`] and fan-out [`Loom::broadcast`]
//! - Axum integration: `/ws` upgrade route and `/health`

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod connections;
pub mod dispatch;
pub mod errors;
pub mod framing;
pub mod health;
pub mod keepalive;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod session;
pub mod writer;

pub use client::{Client, ClientId, ConnectOptions, ConnectionState};
pub use config::LoomConfig;
pub use errors::{ProtocolError, SendError};
pub use protocol::{KEEPALIVE_METHOD, Message, PUSH_ID};
pub use registry::{HandlerEntry, HandlerRegistry, IntoReply, Reply, WantsClient};
pub use router::Loom;
