//! Per-line dispatch: decode, route, run the handler on its own task and
//! queue the correlated reply.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::Client;
use crate::errors::ProtocolError;
use crate::metrics::{
    PROTOCOL_ERRORS_TOTAL, REQUEST_DURATION_SECONDS, REQUEST_ERRORS_TOTAL, REQUESTS_TOTAL,
};
use crate::protocol::{self, Message};
use crate::registry::HandlerRegistry;

/// Handlers slower than this are logged.
const SLOW_HANDLER_SECS: u64 = 5;

/// What happened to one inbound line.
#[derive(Debug)]
pub enum Dispatched {
    /// A handler task was spawned; it queues the reply when done.
    Spawned(JoinHandle<()>),
    /// The line could not be decoded. Nothing is sent back.
    Rejected(ProtocolError),
    /// No handler is registered for the method. Nothing is sent back.
    UnknownMethod(String),
}

/// Handle one line received from `client`.
///
/// Never blocks on the handler: a known method runs on a new task, so a slow
/// handler does not hold up the read loop.
pub fn dispatch_line(
    handlers: &HandlerRegistry,
    client: &Arc<Client>,
    line: impl AsRef<[u8]>,
) -> Dispatched {
    let msg = match protocol::decode_bytes(line.as_ref()) {
        Ok(msg) => msg,
        Err(e) => {
            let reason = match e {
                ProtocolError::Empty => "empty",
                ProtocolError::Malformed(_) => "malformed",
            };
            counter!(PROTOCOL_ERRORS_TOTAL, "reason" => reason).increment(1);
            warn!(client_id = %client.id(), error = %e, "invalid request");
            return Dispatched::Rejected(e);
        }
    };

    let Some(entry) = handlers.lookup(&msg.method) else {
        counter!(PROTOCOL_ERRORS_TOTAL, "reason" => "unknown_method").increment(1);
        warn!(client_id = %client.id(), method = %msg.method, "unknown method");
        return Dispatched::UnknownMethod(msg.method);
    };

    debug!(client_id = %client.id(), id = %msg.id, method = %msg.method, "dispatching");
    counter!(REQUESTS_TOTAL, "method" => msg.method.clone()).increment(1);

    let client = client.clone();
    let Message {
        id, method, data, ..
    } = msg;
    Dispatched::Spawned(tokio::spawn(async move {
        let start = Instant::now();
        let reply = entry.invoke(data, client.clone()).await;
        let elapsed = start.elapsed();

        histogram!(REQUEST_DURATION_SECONDS, "method" => method.clone())
            .record(elapsed.as_secs_f64());
        if elapsed.as_secs() >= SLOW_HANDLER_SECS {
            warn!(method, duration_secs = elapsed.as_secs_f64(), "slow handler");
        }
        if let Err(error) = &reply {
            counter!(REQUEST_ERRORS_TOTAL, "method" => method.clone()).increment(1);
            debug!(method, id, error = %error, "handler returned error");
        }

        if let Err(e) = client.enqueue(&Message::reply(id, reply)) {
            debug!(client_id = %client.id(), method, error = %e, "reply not queued");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientId, ConnectOptions};
    use assert_matches::assert_matches;
    use serde::Deserialize;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[derive(Deserialize)]
    struct Text {
        #[serde(rename = "Text")]
        text: String,
    }

    fn registry() -> HandlerRegistry {
        let mut reg = HandlerRegistry::new();
        reg.register("echo", |req: Text| async move {
            Ok::<_, String>(json!({ "Text": req.text }))
        });
        reg.register("fail", |_req: Value| async { Err::<(), _>("nope") });
        reg
    }

    fn client() -> (Arc<Client>, mpsc::Receiver<Arc<str>>) {
        let (client, rx) = Client::new(
            ClientId::from("c1"),
            ConnectOptions::default(),
            8,
            CancellationToken::new(),
        );
        (Arc::new(client), rx)
    }

    #[tokio::test]
    async fn known_method_queues_reply() {
        let reg = registry();
        let (client, mut rx) = client();

        let Dispatched::Spawned(handle) = dispatch_line(
            &reg,
            &client,
            r#"{"id":"1","method":"echo","data":{"Text":"hi"}}"#,
        ) else {
            panic!("expected spawn");
        };
        handle.await.unwrap();

        let line = rx.recv().await.unwrap();
        assert_eq!(
            &*line,
            "{\"id\":\"1\",\"method\":\"\",\"data\":{\"Text\":\"hi\"},\"error\":\"\"}\n"
        );
    }

    #[tokio::test]
    async fn handler_error_reply_has_no_data() {
        let reg = registry();
        let (client, mut rx) = client();

        let Dispatched::Spawned(handle) =
            dispatch_line(&reg, &client, r#"{"id":"7","method":"fail","data":{}}"#)
        else {
            panic!("expected spawn");
        };
        handle.await.unwrap();

        let reply = protocol::decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply.id, "7");
        assert_eq!(reply.error, "nope");
        assert!(reply.data.is_none());
    }

    #[tokio::test]
    async fn bad_data_yields_error_reply() {
        let reg = registry();
        let (client, mut rx) = client();

        let Dispatched::Spawned(handle) =
            dispatch_line(&reg, &client, r#"{"id":"3","method":"echo","data":[1]}"#)
        else {
            panic!("expected spawn");
        };
        handle.await.unwrap();

        let reply = protocol::decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply.id, "3");
        assert!(!reply.error.is_empty());
    }

    #[tokio::test]
    async fn unknown_method_is_silent() {
        let reg = registry();
        let (client, mut rx) = client();

        let outcome = dispatch_line(&reg, &client, r#"{"id":"2","method":"nope"}"#);
        assert_matches!(outcome, Dispatched::UnknownMethod(m) if m == "nope");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_and_empty_lines_are_rejected() {
        let reg = registry();
        let (client, mut rx) = client();

        assert_matches!(
            dispatch_line(&reg, &client, "{not json"),
            Dispatched::Rejected(ProtocolError::Malformed(_))
        );
        assert_matches!(
            dispatch_line(&reg, &client, "   "),
            Dispatched::Rejected(ProtocolError::Empty)
        );
        assert_matches!(
            dispatch_line(&reg, &client, b"\xff\xfe"),
            Dispatched::Rejected(ProtocolError::Malformed(_))
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reply_after_close_is_discarded() {
        let reg = registry();
        let (client, mut rx) = client();
        assert!(client.mark_closed());

        let Dispatched::Spawned(handle) = dispatch_line(
            &reg,
            &client,
            r#"{"id":"1","method":"echo","data":{"Text":"late"}}"#,
        ) else {
            panic!("expected spawn");
        };
        handle.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
