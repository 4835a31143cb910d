use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use pulse_core::events::{ChangeEvent, ChangeNotification, Collection};
use pulse_store::ChangeFeed;

use crate::dispatch::Dispatcher;

const RESUBSCRIBE_INITIAL: Duration = Duration::from_millis(500);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Narrow seam over the store's change-notification primitive, so the
/// capture loop works against any store (or a polling emulation).
pub trait ChangeSource: Send + Sync + 'static {
    fn subscribe(&self, collection: Collection) -> broadcast::Receiver<ChangeNotification>;
}

impl ChangeSource for ChangeFeed {
    fn subscribe(&self, collection: Collection) -> broadcast::Receiver<ChangeNotification> {
        ChangeFeed::subscribe(self, collection)
    }
}

/// Spawn the capture loop for one collection: each notification becomes
/// one broadcast frame under the collection's kind tag.
///
/// A lagged receiver logs and keeps going. A closed feed resubscribes
/// with exponential backoff rather than taking the process down.
pub fn spawn_watcher(
    source: Arc<dyn ChangeSource>,
    dispatcher: Arc<Dispatcher>,
    collection: Collection,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = source.subscribe(collection);
        let mut backoff = RESUBSCRIBE_INITIAL;
        loop {
            match rx.recv().await {
                Ok(notification) => {
                    backoff = RESUBSCRIBE_INITIAL;
                    match ChangeEvent::from_notification(&notification) {
                        Ok(event) => {
                            let delivered = dispatcher.broadcast(&event);
                            debug!(
                                collection = %collection,
                                document_id = %notification.document_id,
                                delivered,
                                "change fanned out"
                            );
                        }
                        Err(e) => {
                            error!(collection = %collection, error = %e, "failed to encode change");
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(collection = %collection, skipped, "watcher lagged, changes dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!(
                        collection = %collection,
                        backoff_ms = backoff.as_millis() as u64,
                        "change feed closed, resubscribing"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RESUBSCRIBE_MAX);
                    rx = source.subscribe(collection);
                }
            }
        }
    })
}
