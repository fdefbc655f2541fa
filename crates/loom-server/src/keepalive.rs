//! Keepalive probe.
//!
//! Every interval an `_echo` push is queued for the client. Nothing checks
//! for a reply: the probe only keeps intermediaries from idling the
//! connection out, and a dead transport surfaces as a writer failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::Client;
use crate::errors::SendError;
use crate::protocol::{self, KEEPALIVE_METHOD, Message};

/// Outcome of the keepalive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveResult {
    /// The session was cancelled.
    Cancelled,
    /// The client is closed; the session was cancelled.
    SendFailed,
}

/// Queue a keepalive probe every `interval`, starting one interval from now.
///
/// A full queue skips the probe. A closed client cancels `cancel` and ends
/// the loop.
pub async fn run_keepalive(
    client: Arc<Client>,
    interval: Duration,
    cancel: CancellationToken,
) -> KeepaliveResult {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let probe: Arc<str> = Arc::from(protocol::encode(&Message::push(KEEPALIVE_METHOD, None)));

    loop {
        tokio::select! {
            () = cancel.cancelled() => return KeepaliveResult::Cancelled,
            _ = ticker.tick() => match client.enqueue_line(probe.clone()) {
                Ok(()) => debug!(client_id = %client.id(), "keepalive sent"),
                Err(SendError::QueueFull) => {
                    warn!(client_id = %client.id(), "keepalive skipped, queue full");
                }
                Err(SendError::Closed) => {
                    cancel.cancel();
                    return KeepaliveResult::SendFailed;
                }
            },
        }
    }
}
