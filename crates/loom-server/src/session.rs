//! Connection session: one client from accept through disconnect.

use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, Stream, StreamExt};
use metrics::{counter, histogram};
use tokio_util::codec::AnyDelimiterCodecError;
use tracing::{debug, info, instrument, warn};

use crate::client::{Client, ClientId, ConnectOptions};
use crate::connections::Registration;
use crate::dispatch::dispatch_line;
use crate::keepalive::run_keepalive;
use crate::metrics::{CONNECTION_DURATION_SECONDS, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL};
use crate::router::{Hook, Loom};
use crate::writer::run_writer;

/// How long the writer gets to close the transport after the session ends.
const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Run a session over a line stream and a line sink.
///
/// 1. Registers the client and starts its writer and keepalive tasks
/// 2. Runs the connect hook and opens the client
/// 3. Dispatches each line until the stream ends, a read fails, or the
///    session is cancelled (client close, writer failure, server shutdown)
/// 4. Runs the disconnect hook, unregisters the client and stops its tasks
#[instrument(skip_all, fields(client_id))]
pub async fn run_session<L, S>(loom: &Loom, options: ConnectOptions, lines: L, sink: S)
where
    L: Stream<Item = Result<Bytes, AnyDelimiterCodecError>>,
    S: Sink<Arc<str>> + Send + Unpin + 'static,
    S::Error: std::fmt::Display,
{
    let id = ClientId::new();
    let _ = tracing::Span::current().record("client_id", id.as_str());
    let cancel = loom.shutdown_token().child_token();

    let Registration { client, receiver } =
        loom.connections().get_or_insert_with(id, |id| {
            Client::new(id, options, loom.config().queue_depth, cancel.clone())
        });
    let Some(rx) = receiver else {
        warn!("client id already registered, dropping connection");
        return;
    };

    counter!(CONNECTIONS_TOTAL).increment(1);
    info!(broadcast = client.broadcast_enabled(), "client connected");

    let writer = tokio::spawn(run_writer(rx, sink, cancel.clone()));
    let keepalive = tokio::spawn(run_keepalive(
        client.clone(),
        loom.config().keepalive_interval(),
        cancel.clone(),
    ));

    run_hook(loom.connect_hook(), &client, "connect");
    let _ = client.mark_open();

    let mut lines = pin!(lines);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("session cancelled");
                break;
            }
            next = lines.next() => match next {
                Some(Ok(line)) => {
                    let _ = dispatch_line(loom.handlers(), &client, &line);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "read failed, closing connection");
                    break;
                }
                None => {
                    debug!("transport closed");
                    break;
                }
            },
        }
    }

    let _ = client.mark_closing();
    run_hook(loom.disconnect_hook(), &client, "disconnect");
    let _ = loom.connections().remove(client.id());
    cancel.cancel();

    let writer_abort = writer.abort_handle();
    match tokio::time::timeout(WRITER_SHUTDOWN_GRACE, writer).await {
        Ok(Ok(exit)) => debug!(?exit, "writer stopped"),
        Ok(Err(e)) => warn!(error = %e, "writer task failed"),
        Err(_) => {
            warn!("writer did not stop in time, aborting");
            writer_abort.abort();
        }
    }
    keepalive.abort();

    counter!(DISCONNECTIONS_TOTAL).increment(1);
    histogram!(CONNECTION_DURATION_SECONDS).record(client.age().as_secs_f64());
    info!(
        dropped = client.dropped_count(),
        duration_secs = client.age().as_secs_f64(),
        "client disconnected"
    );
}

/// Run a lifecycle hook, containing any panic so cleanup still happens.
fn run_hook(hook: Option<&Hook>, client: &Arc<Client>, name: &'static str) {
    let Some(hook) = hook else { return };
    if std::panic::catch_unwind(AssertUnwindSafe(|| hook(client))).is_err() {
        warn!(hook = name, "lifecycle hook panicked");
    }
}
