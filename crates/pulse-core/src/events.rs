use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire-level kind tag carried on every broadcast frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InitialTransactions,
    TransactionUpdate,
    UsersUpdated,
    ChatMessage,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialTransactions => "initial_transactions",
            Self::TransactionUpdate => "transaction_update",
            Self::UsersUpdated => "users_updated",
            Self::ChatMessage => "chat_message",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A store collection that can emit change notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Accounts,
    Transactions,
    ChatMessages,
}

impl Collection {
    /// The frame kind a change on this collection is broadcast under.
    pub fn event_kind(&self) -> EventKind {
        match self {
            Self::Accounts => EventKind::UsersUpdated,
            Self::Transactions => EventKind::TransactionUpdate,
            Self::ChatMessages => EventKind::ChatMessage,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Transactions => "transactions",
            Self::ChatMessages => "chat_messages",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a mutation did to a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
    Replace,
}

/// One mutation observed on a collection, with the full post-change
/// document attached where one exists (deletes carry the id only).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub collection: Collection,
    pub operation: ChangeOperation,
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<serde_json::Value>,
}

/// The unit of fan-out: a kind tag plus an opaque JSON payload.
/// Immutable once constructed; carries no sequence number or ack state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event: EventKind,
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    /// Wrap a store notification under its collection's kind tag.
    pub fn from_notification(n: &ChangeNotification) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: n.collection.event_kind(),
            payload: serde_json::to_value(n)?,
        })
    }

    /// The snapshot frame sent once per new connection.
    pub fn initial_transactions<T: Serialize>(rows: &[T]) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: EventKind::InitialTransactions,
            payload: serde_json::to_value(rows)?,
        })
    }

    /// A support-chat message relayed through the shared stream.
    pub fn chat_message<T: Serialize>(message: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: EventKind::ChatMessage,
            payload: serde_json::to_value(message)?,
        })
    }

    /// Serialize to the single-line JSON body of one stream frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
