use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use relay_core::{ConnectionId, RelayError, Result};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// A WebSocket client currently connected to the gateway.
#[derive(Debug)]
pub struct ConnectedClient {
    /// Serialized frames for this client's write loop
    pub sender: mpsc::UnboundedSender<String>,
    pub connected_at: DateTime<Utc>,
}

/// Live connections keyed by identity. The only place responses are
/// routed from.
#[derive(Default)]
pub struct ConnectionRegistry {
    clients: RwLock<HashMap<ConnectionId, ConnectedClient>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the receiving end of its frame queue
    pub fn register(&self, connection_id: ConnectionId) -> mpsc::UnboundedReceiver<String> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.clients.write().insert(
            connection_id,
            ConnectedClient {
                sender,
                connected_at: Utc::now(),
            },
        );
        receiver
    }

    pub fn remove(&self, connection_id: &ConnectionId) -> Option<ConnectedClient> {
        self.clients.write().remove(connection_id)
    }

    /// Queue `frame` for exactly the connection named `connection_id`
    pub fn deliver(&self, connection_id: &ConnectionId, frame: String) -> Result<()> {
        let clients = self.clients.read();
        let client = clients
            .get(connection_id)
            .ok_or_else(|| RelayError::RoutingMiss(connection_id.clone()))?;

        client
            .sender
            .send(frame)
            .map_err(|_| RelayError::RoutingMiss(connection_id.clone()))
    }

    pub fn count(&self) -> usize {
        self.clients.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_reaches_only_target() {
        let registry = ConnectionRegistry::new();
        let a = ConnectionId::from("a");
        let b = ConnectionId::from("b");
        let mut rx_a = registry.register(a.clone());
        let mut rx_b = registry.register(b.clone());

        registry.deliver(&a, "hello".to_string()).unwrap();

        assert_eq!(rx_a.try_recv().unwrap(), "hello");
        assert!(rx_b.try_recv().is_err());
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_deliver_to_removed_connection_misses() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from("gone");
        let before = Utc::now();
        let _rx = registry.register(id.clone());

        let removed = registry.remove(&id).unwrap();
        assert!(removed.connected_at >= before);
        assert!(registry.remove(&id).is_none());
        assert_eq!(registry.count(), 0);

        let result = registry.deliver(&id, "late".to_string());
        assert!(matches!(result, Err(RelayError::RoutingMiss(miss)) if miss == id));
    }

    #[test]
    fn test_deliver_to_closed_receiver_misses() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from("closing");
        drop(registry.register(id.clone()));

        assert_eq!(registry.count(), 1);
        assert!(registry.deliver(&id, "late".to_string()).is_err());
    }
}
