//! Registry of live connections and broadcast fan-out.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::debug;

use crate::client::{Client, ClientId};
use crate::metrics::{BROADCAST_DELIVERIES_TOTAL, CONNECTIONS_ACTIVE};

/// Result of [`ConnectionRegistry::get_or_insert_with`].
pub struct Registration {
    /// The client registered under the id.
    pub client: Arc<Client>,
    /// Receiving half of the client's queue. `Some` only for the caller that
    /// created the client.
    pub receiver: Option<mpsc::Receiver<Arc<str>>>,
}

impl Registration {
    /// Whether this call created the client.
    pub fn created(&self) -> bool {
        self.receiver.is_some()
    }
}

/// Concurrent map of live clients keyed by connection id.
///
/// A client is present exactly while it is not closed: removal and the
/// closed transition happen under the same map lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `id`, creating the client with `make` if absent.
    ///
    /// Atomic: concurrent callers for the same id observe a single instance
    /// and exactly one of them receives the queue receiver.
    pub fn get_or_insert_with<F>(&self, id: ClientId, make: F) -> Registration
    where
        F: FnOnce(ClientId) -> (Client, mpsc::Receiver<Arc<str>>),
    {
        match self.clients.entry(id) {
            Entry::Occupied(entry) => Registration {
                client: entry.get().clone(),
                receiver: None,
            },
            Entry::Vacant(entry) => {
                let (client, rx) = make(entry.key().clone());
                let client = Arc::new(client);
                let _ = entry.insert(client.clone());
                gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                Registration {
                    client,
                    receiver: Some(rx),
                }
            }
        }
    }

    /// Get a live client by id.
    pub fn get(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|entry| entry.value().clone())
    }

    /// Remove a client and mark it closed.
    ///
    /// Returns the removed client, or `None` if it was not registered.
    pub fn remove(&self, id: &ClientId) -> Option<Arc<Client>> {
        let removed = self.clients.remove_if(id, |_, client| {
            let _ = client.mark_closed();
            true
        });
        removed.map(|(_, client)| {
            gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
            client
        })
    }

    /// Number of live clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is connected.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Snapshot of all live clients.
    pub fn snapshot(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Queue an encoded line on every broadcast-eligible client.
    ///
    /// Returns how many queues accepted it.
    pub fn broadcast_line(&self, line: &Arc<str>) -> usize {
        let mut delivered = 0;
        let mut eligible = 0;
        for entry in &self.clients {
            let client = entry.value();
            if !client.broadcast_enabled() {
                continue;
            }
            eligible += 1;
            if client.enqueue_line(line.clone()).is_ok() {
                delivered += 1;
            }
        }
        counter!(BROADCAST_DELIVERIES_TOTAL).increment(delivered as u64);
        debug!(eligible, delivered, "broadcast");
        delivered
    }
}
