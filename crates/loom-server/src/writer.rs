//! Writer task: the only path from a client's queue to its transport.

use std::fmt::Display;
use std::sync::Arc;

use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why the writer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// The session was cancelled.
    Cancelled,
    /// Every queue sender was dropped.
    QueueClosed,
    /// Writing to the transport failed. The session was cancelled.
    SendFailed,
}

/// Drain `rx` into `sink` until cancelled or the transport fails.
///
/// A write failure cancels `cancel` so the session tears down. The sink is
/// closed on the way out.
pub async fn run_writer<S>(
    mut rx: mpsc::Receiver<Arc<str>>,
    mut sink: S,
    cancel: CancellationToken,
) -> WriterExit
where
    S: Sink<Arc<str>> + Unpin,
    S::Error: Display,
{
    let exit = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break WriterExit::Cancelled,
            next = rx.recv() => {
                let Some(line) = next else {
                    break WriterExit::QueueClosed;
                };
                if let Err(e) = sink.send(line).await {
                    warn!(error = %e, "write failed, closing connection");
                    cancel.cancel();
                    break WriterExit::SendFailed;
                }
            }
        }
    };

    if let Err(e) = sink.close().await {
        debug!(error = %e, "transport close failed");
    }
    exit
}
