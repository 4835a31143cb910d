use std::sync::Arc;

use tokio::sync::mpsc;

use pulse_core::events::ChangeEvent;

use crate::client::ClientRegistry;

/// Fans one event out to every registered connection.
///
/// Delivery is best-effort and at-most-once: a connection whose sink is
/// full or closed is logged and skipped, and stays registered. Removal
/// is driven by the transport close, not by write failure, so a
/// failing-but-open connection is retried on every subsequent broadcast.
pub struct Dispatcher {
    registry: Arc<ClientRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Serialize once, deliver to the current registry snapshot.
    /// Returns how many sinks accepted the frame.
    pub fn broadcast(&self, event: &ChangeEvent) -> usize {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(kind = %event.event, error = %e, "failed to encode frame");
                return 0;
            }
        };

        let mut delivered = 0;
        for connection in self.registry.snapshot() {
            match connection.tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection_id = %connection.id,
                        kind = %event.event,
                        "send queue full, frame dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(
                        connection_id = %connection.id,
                        kind = %event.event,
                        "sink closed, awaiting transport cleanup"
                    );
                }
            }
        }
        delivered
    }
}
