//! Route registry and typed handler invocation.
//!
//! A handler is any async function taking one deserializable request and
//! returning something that converts into a [`Reply`]. Registration captures
//! the request type, so dispatch only needs the route name and raw payload.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::client::Client;
use crate::protocol;

pub use crate::protocol::Reply;

/// Request types that want the calling client set before the handler runs.
pub trait WantsClient {
    /// Store the client that sent the request.
    fn set_client(&mut self, client: Arc<Client>);
}

/// Conversion from a handler's return value into a [`Reply`].
pub trait IntoReply {
    /// Convert into the reply sent back to the caller.
    fn into_reply(self) -> Reply;
}

/// `Ok` payloads are serialized into `data` (`()` and `None` mean no data);
/// `Err` values are rendered into `error` with `Display`.
impl<T, E> IntoReply for Result<T, E>
where
    T: Serialize,
    E: Display,
{
    fn into_reply(self) -> Reply {
        match self {
            Ok(value) => Ok(protocol::encode_payload(&value)),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[async_trait]
trait Invoke: Send + Sync {
    async fn invoke(&self, data: Value, client: Arc<Client>) -> Reply;
}

type Inject<Req> = fn(&mut Req, Arc<Client>);

struct TypedHandler<F, Req> {
    f: F,
    inject: Option<Inject<Req>>,
    _req: PhantomData<fn() -> Req>,
}

#[async_trait]
impl<F, Fut, Req, R> Invoke for TypedHandler<F, Req>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    R: IntoReply + Send + 'static,
{
    async fn invoke(&self, data: Value, client: Arc<Client>) -> Reply {
        let mut req: Req =
            serde_json::from_value(data).map_err(|e| format!("invalid request data: {e}"))?;
        if let Some(inject) = self.inject {
            inject(&mut req, client);
        }
        (self.f)(req).await.into_reply()
    }
}

fn inject_client<Req: WantsClient>(req: &mut Req, client: Arc<Client>) {
    req.set_client(client);
}

/// A registered route.
pub struct HandlerEntry {
    route: String,
    request_type: &'static str,
    injects_client: bool,
    invoker: Arc<dyn Invoke>,
}

impl HandlerEntry {
    /// Route name.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Name of the request type the handler decodes.
    pub fn request_type(&self) -> &'static str {
        self.request_type
    }

    /// Whether the calling client is injected into the request.
    pub fn injects_client(&self) -> bool {
        self.injects_client
    }

    /// Decode `data`, run the handler and collect its reply.
    ///
    /// Absent data decodes from `null`. A decode failure is returned as an
    /// error without invoking the handler; a panic is caught and reported
    /// the same way.
    pub async fn invoke(&self, data: Option<Value>, client: Arc<Client>) -> Reply {
        let fut = self.invoker.invoke(data.unwrap_or(Value::Null), client);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(reply) => reply,
            Err(panic) => Err(format!("handler panicked: {}", panic_message(&*panic))),
        }
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("route", &self.route)
            .field("request_type", &self.request_type)
            .field("injects_client", &self.injects_client)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_owned()
}

/// Registry mapping route names to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<HandlerEntry>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` under `route`. A later registration for the same route
    /// replaces this one.
    pub fn register<F, Fut, Req, R>(&mut self, route: &str, f: F)
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
        R: IntoReply + Send + 'static,
    {
        self.insert::<F, Req>(route, f, None);
    }

    /// Register `f` under `route`, setting the calling client into each
    /// request before invocation.
    pub fn register_with_client<F, Fut, Req, R>(&mut self, route: &str, f: F)
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        Req: DeserializeOwned + WantsClient + Send + 'static,
        R: IntoReply + Send + 'static,
    {
        self.insert::<F, Req>(route, f, Some(inject_client::<Req>));
    }

    fn insert<F, Req>(&mut self, route: &str, f: F, inject: Option<Inject<Req>>)
    where
        TypedHandler<F, Req>: Invoke + 'static,
    {
        let entry = HandlerEntry {
            route: route.to_owned(),
            request_type: std::any::type_name::<Req>(),
            injects_client: inject.is_some(),
            invoker: Arc::new(TypedHandler {
                f,
                inject,
                _req: PhantomData,
            }),
        };
        if let Some(prev) = self.handlers.insert(route.to_owned(), Arc::new(entry)) {
            debug!(route, previous = prev.request_type, "handler replaced");
        }
    }

    /// Look up the handler for `route`.
    pub fn lookup(&self, route: &str) -> Option<Arc<HandlerEntry>> {
        self.handlers.get(route).cloned()
    }

    /// All registered routes (sorted).
    pub fn routes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `route` is registered.
    pub fn contains(&self, route: &str) -> bool {
        self.handlers.contains_key(route)
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no route is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientId, ConnectOptions};
    use serde::Deserialize;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    // ── Test request types ──────────────────────────────────────────

    #[derive(Deserialize)]
    struct Greet {
        name: String,
    }

    #[derive(Deserialize)]
    struct WhoAmI {
        #[serde(skip)]
        client: Option<Arc<Client>>,
    }

    impl WantsClient for WhoAmI {
        fn set_client(&mut self, client: Arc<Client>) {
            self.client = Some(client);
        }
    }

    #[derive(Debug)]
    struct Boom;

    impl Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("boom")
        }
    }

    fn test_client() -> Arc<Client> {
        let (client, rx) = Client::new(
            ClientId::from("c1"),
            ConnectOptions::default(),
            4,
            CancellationToken::new(),
        );
        drop(rx);
        Arc::new(client)
    }

    async fn greet(req: Greet) -> Result<Value, String> {
        Ok(json!({ "hello": req.name }))
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn register_and_invoke_success() {
        let mut reg = HandlerRegistry::new();
        reg.register("greet", greet);

        let entry = reg.lookup("greet").unwrap();
        let reply = entry
            .invoke(Some(json!({"name": "ada"})), test_client())
            .await;
        assert_eq!(reply, Ok(Some(json!({"hello": "ada"}))));
    }

    #[tokio::test]
    async fn descriptor_records_request_shape() {
        let mut reg = HandlerRegistry::new();
        reg.register("greet", greet);
        reg.register_with_client("whoami", |_req: WhoAmI| async {
            Ok::<_, String>(())
        });

        let greet = reg.lookup("greet").unwrap();
        assert_eq!(greet.route(), "greet");
        assert!(greet.request_type().ends_with("Greet"));
        assert!(!greet.injects_client());

        let whoami = reg.lookup("whoami").unwrap();
        assert!(whoami.injects_client());
    }

    #[tokio::test]
    async fn handler_error_becomes_error_text() {
        let mut reg = HandlerRegistry::new();
        reg.register("fail", |_req: ()| async { Err::<(), _>(Boom) });

        let reply = reg.lookup("fail").unwrap().invoke(None, test_client()).await;
        assert_eq!(reply, Err("boom".into()));
    }

    #[tokio::test]
    async fn unit_and_none_payloads_carry_no_data() {
        let mut reg = HandlerRegistry::new();
        reg.register("unit", |_req: ()| async { Ok::<(), String>(()) });
        reg.register("none", |_req: ()| async { Ok::<Option<u32>, String>(None) });

        for route in ["unit", "none"] {
            let reply = reg.lookup(route).unwrap().invoke(None, test_client()).await;
            assert_eq!(reply, Ok(None), "{route}");
        }
    }

    #[tokio::test]
    async fn decode_failure_skips_handler() {
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = called.clone();
        let mut reg = HandlerRegistry::new();
        reg.register("greet", move |req: Greet| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            async move { Ok::<_, String>(req.name) }
        });

        let entry = reg.lookup("greet").unwrap();
        let reply = entry.invoke(Some(json!({"name": 42})), test_client()).await;
        assert!(reply.unwrap_err().starts_with("invalid request data"));

        let reply = entry.invoke(None, test_client()).await;
        assert!(reply.is_err());
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn client_is_injected() {
        let mut reg = HandlerRegistry::new();
        reg.register_with_client("whoami", |req: WhoAmI| async move {
            let client = req.client.ok_or("no client")?;
            Ok::<_, &str>(client.id().to_string())
        });

        let reply = reg
            .lookup("whoami")
            .unwrap()
            .invoke(Some(json!({})), test_client())
            .await;
        assert_eq!(reply, Ok(Some(json!("c1"))));
    }

    #[tokio::test]
    async fn panic_becomes_error() {
        let mut reg = HandlerRegistry::new();
        reg.register("panic", |_req: ()| async {
            if true {
                panic!("kaboom");
            }
            Ok::<(), String>(())
        });

        let reply = reg.lookup("panic").unwrap().invoke(None, test_client()).await;
        assert_eq!(reply, Err("handler panicked: kaboom".into()));
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut reg = HandlerRegistry::new();
        reg.register("v", |_req: ()| async { Ok::<_, String>(1) });
        reg.register("v", |_req: ()| async { Ok::<_, String>(2) });

        assert_eq!(reg.len(), 1);
        let reply = reg.lookup("v").unwrap().invoke(None, test_client()).await;
        assert_eq!(reply, Ok(Some(json!(2))));
    }

    #[test]
    fn list_routes() {
        let mut reg = HandlerRegistry::new();
        assert!(reg.is_empty());
        reg.register("b.method", greet);
        reg.register("a.method", greet);

        assert_eq!(reg.routes(), vec!["a.method", "b.method"]);
        assert!(reg.contains("a.method"));
        assert!(!reg.contains("c.method"));
        assert!(reg.lookup("c.method").is_none());
    }
}
