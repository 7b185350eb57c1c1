//! Registry of admitted WebSocket connections.

use crate::protocol::ClientRole;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Per-connection outbound queue depth. A client that falls this far behind
/// starts losing messages.
pub const OUTBOUND_QUEUE: usize = 256;

/// Item on a connection's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Send a close frame and stop writing.
    Close { code: u16, reason: String },
}

type Registry = HashMap<Uuid, (ClientRole, mpsc::Sender<Outbound>)>;

/// Connections that completed the `hello` handshake.
///
/// Entries are added on registration and removed when the socket closes;
/// unregistered connections never receive broadcasts.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: Arc<RwLock<Registry>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, id: Uuid, role: ClientRole, sender: mpsc::Sender<Outbound>) {
        self.connections.write().await.insert(id, (role, sender));
    }

    pub async fn remove(&self, id: Uuid) {
        self.connections.write().await.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Number of registered connections holding `role`.
    pub async fn count(&self, role: ClientRole) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|(r, _)| *r == role)
            .count()
    }

    /// Sends `json` to every registered connection.
    pub async fn broadcast(&self, json: &str) {
        let connections = self.connections.read().await;
        for (id, (_, sender)) in connections.iter() {
            deliver(*id, sender, json);
        }
    }

    /// Sends `json` to every control connection except `skip`.
    pub async fn notify_control(&self, json: &str, skip: Option<Uuid>) {
        let connections = self.connections.read().await;
        for (id, (role, sender)) in connections.iter() {
            if *role == ClientRole::Control && Some(*id) != skip {
                deliver(*id, sender, json);
            }
        }
    }

    /// Sends `json` to one connection, if it is still registered.
    pub async fn send(&self, id: Uuid, json: &str) {
        let connections = self.connections.read().await;
        if let Some((_, sender)) = connections.get(&id) {
            deliver(id, sender, json);
        }
    }
}

fn deliver(id: Uuid, sender: &mpsc::Sender<Outbound>, json: &str) {
    if let Err(e) = sender.try_send(Outbound::Text(json.to_string())) {
        tracing::warn!(
            connection = %id,
            "dropping message for slow consumer: {}",
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn control_notices_skip_overlays_and_origin() {
        let manager = ConnectionManager::new();
        let (overlay_tx, mut overlay_rx) = mpsc::channel(4);
        let (a_tx, mut a_rx) = mpsc::channel(4);
        let (b_tx, mut b_rx) = mpsc::channel(4);
        let a = Uuid::new_v4();
        manager.add(Uuid::new_v4(), ClientRole::Overlay, overlay_tx).await;
        manager.add(a, ClientRole::Control, a_tx).await;
        manager.add(Uuid::new_v4(), ClientRole::Control, b_tx).await;

        manager.notify_control("n", Some(a)).await;

        assert_eq!(b_rx.try_recv().unwrap(), Outbound::Text("n".into()));
        assert!(a_rx.try_recv().is_err());
        assert!(overlay_rx.try_recv().is_err());
        assert_eq!(manager.count(ClientRole::Control).await, 2);
    }

    #[tokio::test]
    async fn full_queues_drop_instead_of_blocking() {
        let manager = ConnectionManager::new();
        let (tx, mut rx) = mpsc::channel(1);
        manager.add(Uuid::new_v4(), ClientRole::Overlay, tx).await;

        manager.broadcast("1").await;
        manager.broadcast("2").await;

        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("1".into()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn removed_connections_get_nothing() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(4);
        manager.add(id, ClientRole::Overlay, tx).await;
        manager.remove(id).await;

        manager.broadcast("x").await;
        manager.send(id, "y").await;

        assert!(rx.try_recv().is_err());
        assert!(manager.is_empty().await);
    }
}
