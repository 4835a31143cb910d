use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use pulse_core::ids::ConnectionId;

/// One open stream subscriber: a unique id and the sink its frames go to.
/// Subscribed to every event kind; there is no topic filtering.
pub struct Connection {
    pub id: ConnectionId,
    pub tx: mpsc::Sender<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two live connections with the same id. UUIDv7 generation makes this
    /// structurally impossible; reaching it means the id source is broken.
    #[error("duplicate connection id: {0}")]
    DuplicateConnection(ConnectionId),
}

/// Registry of all open stream connections. The only shared mutable state
/// in the process; nothing outside this type touches the backing map.
pub struct ClientRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new connection and return its id + frame receiver.
    pub fn register(&self) -> Result<(ConnectionId, mpsc::Receiver<String>), RegistryError> {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let connection = Arc::new(Connection { id: id.clone(), tx });
        match self.connections.entry(id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateConnection(id)),
            Entry::Vacant(slot) => {
                slot.insert(connection);
                Ok((id, rx))
            }
        }
    }

    /// Remove a connection by id. Idempotent: removing an absent id is a no-op.
    pub fn unregister(&self, id: &ConnectionId) {
        self.connections.remove(id);
    }

    /// Copy-on-read view of the current connections for one dispatch pass.
    /// Removals that land mid-pass affect the next snapshot, not this one.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Targeted delivery (used for the per-connection snapshot frame).
    pub fn send_to(&self, id: &ConnectionId, frame: String) -> bool {
        match self.connections.get(id) {
            Some(connection) => match connection.tx.try_send(frame) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    tracing::warn!(
                        connection_id = %id,
                        frame_len = frame.len(),
                        "send queue full, dropping frame"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            None => false,
        }
    }

    /// Number of open connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }
}
