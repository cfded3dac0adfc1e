use super::{Connection, ConnectionId, Delivery, Outbound};
use std::collections::HashMap;
use tracing::{debug, warn};

/// The set of currently registered connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, connection: Connection) {
        debug!(connection_id = ?connection.id, "Adding connection");
        self.connections.insert(connection.id, connection);
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(&id);
        if removed.is_some() {
            debug!(connection_id = ?id, "Connection removed");
        }
        removed
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Send to every open member; closed members are skipped silently and
    /// members whose queue is full are dropped from the registry.
    /// Returns how many members the message was queued for.
    pub fn broadcast(&mut self, message: &Outbound) -> usize {
        self.broadcast_filtered(message, |_| true)
    }

    /// Like `broadcast`, but never to `origin`.
    pub fn broadcast_except(&mut self, origin: ConnectionId, message: &Outbound) -> usize {
        self.broadcast_filtered(message, |connection| connection.id != origin)
    }

    /// Close and drop every member, optionally sending `notice` first.
    pub fn close_all(&mut self, notice: Option<&str>, code: u16, reason: &str) -> usize {
        let count = self.connections.len();
        for (_, connection) in self.connections.drain() {
            if let Some(notice) = notice {
                connection.send_text(notice);
            }
            connection.close(code, reason);
        }
        debug!(count, "Closed all connections");
        count
    }

    fn broadcast_filtered<F>(&mut self, message: &Outbound, include: F) -> usize
    where
        F: Fn(&Connection) -> bool,
    {
        let mut delivered = 0;
        let mut stalled = Vec::new();
        for connection in self.connections.values() {
            if !include(connection) || !connection.is_open() {
                continue;
            }
            match connection.deliver(message.clone()) {
                Delivery::Queued => delivered += 1,
                Delivery::Full => stalled.push(connection.id),
                Delivery::Closed => {}
            }
        }
        // Dropping the last sender ends the writer once it drains its queue.
        for id in stalled {
            warn!(connection_id = ?id, "Outgoing queue full, dropping connection");
            self.connections.remove(&id);
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    #[test]
    fn test_add_remove() {
        let mut registry = ConnectionRegistry::new();
        let (connection, _rx) = Connection::channel();
        let id = connection.id;

        registry.add(connection);
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_broadcast_skips_closed_members() {
        let mut registry = ConnectionRegistry::new();
        let (open, mut open_rx) = Connection::channel();
        let (closed, closed_rx) = Connection::channel();
        registry.add(open);
        registry.add(closed);
        drop(closed_rx);

        let delivered = registry.broadcast(&Outbound::Text("hi".to_string()));

        assert_eq!(delivered, 1);
        assert_eq!(open_rx.try_recv().ok(), Some(Outbound::Text("hi".to_string())));
    }

    #[test]
    fn test_stalled_member_is_dropped() {
        let mut registry = ConnectionRegistry::new();
        let (stalled, mut stalled_rx) = Connection::with_capacity(1);
        let (healthy, mut healthy_rx) = Connection::channel();
        let stalled_id = stalled.id;
        registry.add(stalled);
        registry.add(healthy);

        assert_eq!(registry.broadcast(&Outbound::Text("a".to_string())), 2);
        assert_eq!(registry.broadcast(&Outbound::Text("b".to_string())), 1);

        assert!(!registry.contains(stalled_id));
        assert_eq!(registry.len(), 1);
        assert_eq!(stalled_rx.try_recv().ok(), Some(Outbound::Text("a".to_string())));
        // sender dropped with the registry entry
        assert_eq!(stalled_rx.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(healthy_rx.try_recv().ok(), Some(Outbound::Text("a".to_string())));
        assert_eq!(healthy_rx.try_recv().ok(), Some(Outbound::Text("b".to_string())));
    }

    #[test]
    fn test_broadcast_except_origin() {
        let mut registry = ConnectionRegistry::new();
        let (origin, mut origin_rx) = Connection::channel();
        let (other, mut other_rx) = Connection::channel();
        let origin_id = origin.id;
        registry.add(origin);
        registry.add(other);

        assert_eq!(registry.broadcast_except(origin_id, &Outbound::Text("x".to_string())), 1);
        assert!(origin_rx.try_recv().is_err());
        assert!(other_rx.try_recv().is_ok());
    }

    #[test]
    fn test_close_all_sends_notice_then_close() {
        let mut registry = ConnectionRegistry::new();
        let (connection, mut rx) = Connection::channel();
        registry.add(connection);

        assert_eq!(registry.close_all(Some("bye"), 1008, "gone"), 1);
        assert!(registry.is_empty());
        assert_eq!(rx.try_recv().ok(), Some(Outbound::Text("bye".to_string())));
        assert_eq!(
            rx.try_recv().ok(),
            Some(Outbound::Close {
                code: 1008,
                reason: "gone".to_string()
            })
        );
    }
}
