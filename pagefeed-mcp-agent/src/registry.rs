use std::collections::HashMap;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// Set of currently open browser connections, keyed by a server-side id.
///
/// Membership is best-effort: a connection is added when its channel opens
/// and removed when it closes; a send that fails in between drops the stale
/// entry opportunistically instead of raising.
#[derive(Default)]
pub struct ConnectionRegistry {
    clients: Mutex<HashMap<Uuid, mpsc::UnboundedSender<ServerMessage>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, id: Uuid, sender: mpsc::UnboundedSender<ServerMessage>) {
        self.clients.lock().await.insert(id, sender);
    }

    pub async fn remove(&self, id: Uuid) {
        self.clients.lock().await.remove(&id);
    }

    pub async fn count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Sends a message to every open connection, pruning any whose channel
    /// has closed. Returns how many connections were actually sent to.
    pub async fn broadcast(&self, message: &ServerMessage) -> usize {
        let mut clients = self.clients.lock().await;
        let mut sent = 0;
        clients.retain(|_, sender| match sender.send(message.clone()) {
            Ok(()) => {
                sent += 1;
                true
            }
            Err(_) => false,
        });
        sent
    }
}
