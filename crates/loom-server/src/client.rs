//! Per-connection client state and the outbound send queue.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::errors::SendError;
use crate::metrics::MESSAGES_DROPPED_TOTAL;
use crate::protocol::{self, Message};

/// Unique identifier of one transport connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh, time-ordered id.
    pub fn new() -> Self {
        Self(format!("client_{}", Uuid::now_v7()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options supplied by the client when it connects.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// Whether the client receives broadcasts.
    pub broadcast: bool,
    /// Raw query parameters of the upgrade request.
    pub params: HashMap<String, String>,
}

impl ConnectOptions {
    /// Derive options from upgrade query parameters.
    ///
    /// `broadcast=false` (also `0`, `no`, `off`) opts out of broadcasts.
    /// Missing or unrecognised values keep the default (opted in).
    pub fn from_query(params: HashMap<String, String>) -> Self {
        let broadcast = params
            .get("broadcast")
            .and_then(|v| parse_flag(v))
            .unwrap_or(true);
        Self { broadcast, params }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            broadcast: true,
            params: HashMap::new(),
        }
    }
}

/// Read an on/off flag as used in query strings and environment variables.
///
/// `true`, `1`, `yes` and `on` switch it on; `false`, `0`, `no` and `off`
/// switch it off, ignoring case. Anything else is `None`.
pub fn parse_flag(val: &str) -> Option<bool> {
    match val.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Registered, connect hook not yet run.
    Connecting = 0,
    /// Reading requests.
    Open = 1,
    /// Read loop finished, disconnect hook running.
    Closing = 2,
    /// Removed from the registry. Terminal.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// A connected peer.
pub struct Client {
    id: ClientId,
    state: AtomicU8,
    /// Send channel to the connection's writer task.
    tx: mpsc::Sender<Arc<str>>,
    broadcast: bool,
    params: HashMap<String, String>,
    metadata: Mutex<serde_json::Map<String, Value>>,
    connected_at: Instant,
    dropped_messages: AtomicU64,
    cancel: CancellationToken,
}

impl Client {
    /// Create a client with an outbound queue of `queue_depth` messages.
    ///
    /// Returns the client and the receiving half of its queue, which belongs
    /// to the writer task. `cancel` ends the connection's session when
    /// cancelled.
    pub fn new(
        id: ClientId,
        options: ConnectOptions,
        queue_depth: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let client = Self {
            id,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            tx,
            broadcast: options.broadcast,
            params: options.params,
            metadata: Mutex::new(serde_json::Map::new()),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
            cancel,
        };
        (client, rx)
    }

    /// Connection id.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the client has not been closed yet.
    pub fn connected(&self) -> bool {
        self.state() != ConnectionState::Closed
    }

    /// Whether the client receives broadcasts.
    pub fn broadcast_enabled(&self) -> bool {
        self.broadcast
    }

    /// A query parameter from the upgrade request.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// All query parameters from the upgrade request.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Read an application-defined metadata value.
    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.metadata.lock().get(key).cloned()
    }

    /// Store an application-defined metadata value.
    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        let _ = self.metadata.lock().insert(key.into(), value);
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Messages dropped because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Push a server-initiated message to this client.
    pub fn call<T: Serialize + ?Sized>(&self, method: &str, data: &T) -> Result<(), SendError> {
        if !self.connected() {
            return Err(SendError::Closed);
        }
        self.enqueue(&Message::push(method, protocol::encode_payload(data)))
    }

    /// Queue a message for the writer without blocking.
    pub fn enqueue(&self, message: &Message) -> Result<(), SendError> {
        if !self.connected() {
            return Err(SendError::Closed);
        }
        self.enqueue_line(Arc::from(protocol::encode(message)))
    }

    /// Queue an already encoded line.
    pub(crate) fn enqueue_line(&self, line: Arc<str>) -> Result<(), SendError> {
        if !self.connected() {
            return Err(SendError::Closed);
        }
        match self.tx.try_send(line) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(line)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                counter!(MESSAGES_DROPPED_TOTAL).increment(1);
                warn!(client_id = %self.id, len = line.len(), "send queue full, dropping message");
                Err(SendError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Ask the session to terminate. Returns immediately.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether termination was requested.
    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn mark_open(&self) -> bool {
        self.transition(ConnectionState::Connecting, ConnectionState::Open)
    }

    pub(crate) fn mark_closing(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                match ConnectionState::from_u8(s) {
                    ConnectionState::Connecting | ConnectionState::Open => {
                        Some(ConnectionState::Closing as u8)
                    }
                    _ => None,
                }
            })
            .is_ok()
    }

    /// Flip to `Closed`. Returns `true` only for the first caller.
    pub(crate) fn mark_closed(&self) -> bool {
        self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel)
            != ConnectionState::Closed as u8
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("broadcast", &self.broadcast)
            .finish_non_exhaustive()
    }
}
