use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use atimer_types::events::PushEvent;
use atimer_types::models::EndpointCoords;

use crate::push::PushError;

/// Tracks the sockets open on this node and routes pushes to them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Coordinates other nodes use to reach this one.
    endpoint: EndpointCoords,

    /// Per-connection send channels: connection_id -> sender
    connections: RwLock<HashMap<String, mpsc::UnboundedSender<PushEvent>>>,
}

impl Dispatcher {
    pub fn new(endpoint: EndpointCoords) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                endpoint,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn endpoint(&self) -> &EndpointCoords {
        &self.inner.endpoint
    }

    /// Register a new socket. Returns (connection_id, receiver).
    pub async fn register(&self) -> (String, mpsc::UnboundedReceiver<PushEvent>) {
        let connection_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .insert(connection_id.clone(), tx);
        (connection_id, rx)
    }

    pub async fn unregister(&self, connection_id: &str) {
        self.inner.connections.write().await.remove(connection_id);
    }

    /// Deliver an event to a socket on this node.
    ///
    /// Fails with `Gone` when the connection is unknown here or its socket
    /// task has already exited.
    pub async fn push_local(&self, connection_id: &str, event: PushEvent) -> Result<(), PushError> {
        let connections = self.inner.connections.read().await;
        let tx = connections
            .get(connection_id)
            .ok_or_else(|| PushError::Gone(connection_id.to_string()))?;
        tx.send(event)
            .map_err(|_| PushError::Gone(connection_id.to_string()))
    }

    pub async fn is_live(&self, connection_id: &str) -> bool {
        self.inner.connections.read().await.contains_key(connection_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(EndpointCoords::new("local", "atimer", "test"))
    }

    #[tokio::test]
    async fn push_reaches_registered_connection() {
        let dispatcher = dispatcher();
        let (id, mut rx) = dispatcher.register().await;

        dispatcher
            .push_local(&id, PushEvent::start_timer("card-1"))
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(PushEvent::start_timer("card-1")));
    }

    #[tokio::test]
    async fn push_to_unknown_connection_is_gone() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .push_local("nope", PushEvent::start_timer("card-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Gone(id) if id == "nope"));
    }

    #[tokio::test]
    async fn push_after_receiver_dropped_is_gone() {
        let dispatcher = dispatcher();
        let (id, rx) = dispatcher.register().await;
        drop(rx);

        let err = dispatcher
            .push_local(&id, PushEvent::start_timer("card-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Gone(_)));
    }

    #[tokio::test]
    async fn unregister_removes_connection() {
        let dispatcher = dispatcher();
        let (a, _rx_a) = dispatcher.register().await;
        let (b, _rx_b) = dispatcher.register().await;
        assert_ne!(a, b);
        assert_eq!(dispatcher.connection_count().await, 2);

        dispatcher.unregister(&a).await;
        assert!(!dispatcher.is_live(&a).await);
        assert!(dispatcher.is_live(&b).await);
    }
}
