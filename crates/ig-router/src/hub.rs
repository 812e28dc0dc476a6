//! Per-user output channels
//!
//! Each connected client holds a bounded receiver. Delivery is
//! fire-and-forget: a full buffer drops the event for that connection, a
//! closed one is pruned. Nothing is persisted for users who are offline.

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Destination for serialized change payloads
pub trait EventSink: Send + Sync {
    /// Push `payload` to every open channel of `user_id`; returns how many took it
    fn deliver(&self, user_id: &str, payload: Bytes) -> usize;
}

struct Connection {
    id: Uuid,
    tx: mpsc::Sender<Bytes>,
}

/// A client's end of its output channel
pub struct Subscription {
    pub id: Uuid,
    pub receiver: mpsc::Receiver<Bytes>,
}

pub struct DeliveryHub {
    clients: DashMap<String, Vec<Connection>>,
    buffer: usize,
}

impl DeliveryHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            clients: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    pub fn connect(&self, user_id: &str) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        self.clients
            .entry(user_id.to_string())
            .or_default()
            .push(Connection { id, tx });
        metrics::gauge!("gateway_client_connections").increment(1.0);
        debug!(user_id, connection = %id, "Client connected");
        Subscription { id, receiver }
    }

    pub fn connection_count(&self) -> usize {
        self.clients.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.clients.get(user_id).is_some_and(|c| !c.is_empty())
    }
}

impl EventSink for DeliveryHub {
    fn deliver(&self, user_id: &str, payload: Bytes) -> usize {
        let mut delivered = 0;
        let mut closed = 0;

        if let Some(mut connections) = self.clients.get_mut(user_id) {
            connections.retain(|conn| match conn.tx.try_send(payload.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(user_id, connection = %conn.id, "Client buffer full, event dropped");
                    metrics::counter!("gateway_deliveries_dropped_total").increment(1);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed += 1;
                    false
                }
            });
        }

        if closed > 0 {
            metrics::gauge!("gateway_client_connections").decrement(closed as f64);
            self.clients.remove_if(user_id, |_, conns| conns.is_empty());
            debug!(user_id, closed, "Pruned closed client connections");
        }
        trace!(user_id, delivered, "Payload delivered");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivers_to_every_connection_of_user() {
        let hub = DeliveryHub::new(8);
        let mut a = hub.connect("u1");
        let mut b = hub.connect("u1");
        let mut other = hub.connect("u2");

        assert_eq!(hub.deliver("u1", Bytes::from_static(b"{}")), 2);
        assert_eq!(a.receiver.recv().await.unwrap(), Bytes::from_static(b"{}"));
        assert_eq!(b.receiver.recv().await.unwrap(), Bytes::from_static(b"{}"));
        assert!(other.receiver.try_recv().is_err());
        assert_eq!(hub.connection_count(), 3);
    }

    #[tokio::test]
    async fn test_offline_user_gets_nothing() {
        let hub = DeliveryHub::new(8);
        assert_eq!(hub.deliver("nobody", Bytes::from_static(b"{}")), 0);
        assert!(!hub.is_connected("nobody"));
    }

    #[tokio::test]
    async fn test_closed_connections_are_pruned() {
        let hub = DeliveryHub::new(8);
        let sub = hub.connect("u1");
        drop(sub);

        assert_eq!(hub.deliver("u1", Bytes::from_static(b"{}")), 0);
        assert!(!hub.is_connected("u1"));
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_without_blocking() {
        let hub = DeliveryHub::new(1);
        let mut sub = hub.connect("u1");

        assert_eq!(hub.deliver("u1", Bytes::from_static(b"1")), 1);
        assert_eq!(hub.deliver("u1", Bytes::from_static(b"2")), 0);
        assert_eq!(sub.receiver.recv().await.unwrap(), Bytes::from_static(b"1"));
        assert!(hub.is_connected("u1"));
    }
}
