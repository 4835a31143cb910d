use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use pulse_core::events::{ChangeNotification, ChangeOperation, Collection};
use pulse_core::ids::{AccountId, MessageId};

use crate::database::Database;
use crate::error::StoreError;
use crate::feed::ChangeFeed;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    User,
    Agent,
}

impl std::fmt::Display for SenderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

impl std::str::FromStr for SenderRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            other => Err(format!("unknown sender role: {other}")),
        }
    }
}

/// One support-chat message. The account id is the conversation key,
/// not a foreign key, so history survives account deletion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessageRow {
    pub id: MessageId,
    pub account_id: AccountId,
    pub sender: SenderRole,
    pub body: String,
    pub seen: bool,
    pub created_at: String,
}

pub struct ChatRepo {
    db: Database,
    feed: Arc<ChangeFeed>,
}

impl ChatRepo {
    pub fn new(db: Database, feed: Arc<ChangeFeed>) -> Self {
        Self { db, feed }
    }

    /// Persist a message. Unseen until the receiving side's client says
    /// otherwise; the server never flips the flag.
    #[instrument(skip(self, body), fields(account_id = %account_id, sender = %sender))]
    pub fn append(
        &self,
        account_id: &AccountId,
        sender: SenderRole,
        body: &str,
    ) -> Result<ChatMessageRow, StoreError> {
        let id = MessageId::new();
        let now = Utc::now().to_rfc3339();

        let row = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_messages (id, account_id, sender, body, seen, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                rusqlite::params![id.as_str(), account_id.as_str(), sender.to_string(), body, now],
            )?;

            Ok(ChatMessageRow {
                id: id.clone(),
                account_id: account_id.clone(),
                sender,
                body: body.to_string(),
                seen: false,
                created_at: now,
            })
        })?;

        self.feed.publish(ChangeNotification {
            collection: Collection::ChatMessages,
            operation: ChangeOperation::Insert,
            document_id: row.id.to_string(),
            document: Some(serde_json::to_value(&row)?),
        });
        Ok(row)
    }

    /// Full conversation for one account, oldest first.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub fn history(&self, account_id: &AccountId) -> Result<Vec<ChatMessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, account_id, sender, body, seen, created_at
                 FROM chat_messages WHERE account_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map([account_id.as_str()], |row| Ok(Self::from_row(row)))?;
            rows.map(|r| r.map_err(StoreError::from).and_then(|inner| inner))
                .collect()
        })
    }

    fn from_row(row: &rusqlite::Row<'_>) -> Result<ChatMessageRow, StoreError> {
        let sender_raw: String = row_helpers::get(row, 2, "chat_messages", "sender")?;
        Ok(ChatMessageRow {
            id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "chat_messages", "id")?),
            account_id: AccountId::from_raw(row_helpers::get::<String>(
                row,
                1,
                "chat_messages",
                "account_id",
            )?),
            sender: row_helpers::parse_enum(&sender_raw, "chat_messages", "sender")?,
            body: row_helpers::get(row, 3, "chat_messages", "body")?,
            seen: row_helpers::get::<i64>(row, 4, "chat_messages", "seen")? != 0,
            created_at: row_helpers::get(row, 5, "chat_messages", "created_at")?,
        })
    }
}
