//! Registry of live websocket clients

use crate::error::RelayError;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

/// Opaque handle for one connected client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A client that could not be written to during a broadcast
#[derive(Debug)]
pub struct BroadcastFailure {
    pub client: ClientId,
    pub error: RelayError,
}

/// Live clients, each reachable through its connection's outbound channel
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, sender: mpsc::UnboundedSender<String>) -> ClientId {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.clients.lock().await.insert(id, sender);
        info!(client = %id, "Client registered");
        id
    }

    /// Returns false if the client was already gone
    pub async fn unregister(&self, id: ClientId) -> bool {
        let removed = self.clients.lock().await.remove(&id).is_some();
        if removed {
            info!(client = %id, "Client unregistered");
        }
        removed
    }

    /// Write `payload` to every client. A failed write does not stop the rest.
    pub async fn broadcast_all(&self, payload: &str) -> Vec<BroadcastFailure> {
        let clients = self.clients.lock().await;
        let mut failures = Vec::new();

        for (id, sender) in clients.iter() {
            if sender.send(payload.to_string()).is_err() {
                failures.push(BroadcastFailure {
                    client: *id,
                    error: RelayError::Closed(*id),
                });
            }
        }

        debug!(
            clients = clients.len(),
            failed = failures.len(),
            "Broadcast complete"
        );
        failures
    }

    /// Remove every failed client, returning how many were still registered
    pub async fn prune(&self, failures: &[BroadcastFailure]) -> usize {
        let mut clients = self.clients.lock().await;
        failures
            .iter()
            .filter(|failure| clients.remove(&failure.client).is_some())
            .count()
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}
