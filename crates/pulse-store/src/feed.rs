use tokio::sync::broadcast;
use tracing::debug;

use pulse_core::events::{ChangeNotification, Collection};

/// Per-collection change-notification hub.
///
/// Repos publish one notification per committed mutation; watchers
/// subscribe per collection. Receivers that fall behind get a `Lagged`
/// error and miss notifications: freshness over completeness, matching
/// the delivery contract of the stream itself.
pub struct ChangeFeed {
    accounts: broadcast::Sender<ChangeNotification>,
    transactions: broadcast::Sender<ChangeNotification>,
    chat_messages: broadcast::Sender<ChangeNotification>,
}

impl ChangeFeed {
    /// Create a feed with the given per-collection buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (accounts, _) = broadcast::channel(capacity);
        let (transactions, _) = broadcast::channel(capacity);
        let (chat_messages, _) = broadcast::channel(capacity);
        Self {
            accounts,
            transactions,
            chat_messages,
        }
    }

    fn sender(&self, collection: Collection) -> &broadcast::Sender<ChangeNotification> {
        match collection {
            Collection::Accounts => &self.accounts,
            Collection::Transactions => &self.transactions,
            Collection::ChatMessages => &self.chat_messages,
        }
    }

    /// Subscribe to one collection's notifications. Each subscriber gets
    /// an independent stream starting from the moment of subscription.
    pub fn subscribe(&self, collection: Collection) -> broadcast::Receiver<ChangeNotification> {
        self.sender(collection).subscribe()
    }

    /// Publish a notification. Silently dropped when nobody subscribes.
    pub fn publish(&self, notification: ChangeNotification) {
        let sender = self.sender(notification.collection);
        debug!(
            collection = %notification.collection,
            document_id = %notification.document_id,
            subscribers = sender.receiver_count(),
            "change published"
        );
        let _ = sender.send(notification);
    }

    /// Number of active subscribers on one collection.
    pub fn subscriber_count(&self, collection: Collection) -> usize {
        self.sender(collection).receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::events::ChangeOperation;

    fn notification(collection: Collection) -> ChangeNotification {
        ChangeNotification {
            collection,
            operation: ChangeOperation::Insert,
            document_id: "doc_1".into(),
            document: Some(serde_json::json!({"k": "v"})),
        }
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let feed = ChangeFeed::new(32);
        let mut rx = feed.subscribe(Collection::Transactions);

        feed.publish(notification(Collection::Transactions));

        let n = rx.recv().await.unwrap();
        assert_eq!(n.document_id, "doc_1");
        assert_eq!(n.operation, ChangeOperation::Insert);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let feed = ChangeFeed::new(32);
        let mut accounts_rx = feed.subscribe(Collection::Accounts);
        let mut txn_rx = feed.subscribe(Collection::Transactions);

        feed.publish(notification(Collection::Accounts));

        assert_eq!(accounts_rx.recv().await.unwrap().collection, Collection::Accounts);
        assert!(txn_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let feed = ChangeFeed::new(32);
        feed.publish(notification(Collection::ChatMessages));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let feed = ChangeFeed::new(32);
        let mut rx1 = feed.subscribe(Collection::Transactions);
        let mut rx2 = feed.subscribe(Collection::Transactions);
        assert_eq!(feed.subscriber_count(Collection::Transactions), 2);

        feed.publish(notification(Collection::Transactions));

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
