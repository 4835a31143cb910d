use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use pulse_core::events::{ChangeNotification, ChangeOperation, Collection};
use pulse_core::ids::AccountId;

use crate::database::Database;
use crate::error::StoreError;
use crate::feed::ChangeFeed;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountRow {
    pub id: AccountId,
    pub username: String,
    pub balance_cents: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Account mutation surface. The admin screens that drive it live
/// elsewhere; this repo exists so the accounts collection emits change
/// notifications like every other one.
pub struct AccountRepo {
    db: Database,
    feed: Arc<ChangeFeed>,
}

impl AccountRepo {
    pub fn new(db: Database, feed: Arc<ChangeFeed>) -> Self {
        Self { db, feed }
    }

    /// Create an account. Usernames are unique; a duplicate is a Conflict.
    #[instrument(skip(self), fields(username))]
    pub fn create(&self, username: &str) -> Result<AccountRow, StoreError> {
        let id = AccountId::new();
        let now = Utc::now().to_rfc3339();

        let row = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (id, username, balance_cents, created_at, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?4)",
                rusqlite::params![id.as_str(), username, now, now],
            )?;

            Ok(AccountRow {
                id: id.clone(),
                username: username.to_string(),
                balance_cents: 0,
                created_at: now.clone(),
                updated_at: now,
            })
        })?;

        self.publish(ChangeOperation::Insert, &row)?;
        Ok(row)
    }

    /// Get an account by ID.
    #[instrument(skip(self), fields(account_id = %id))]
    pub fn get(&self, id: &AccountId) -> Result<AccountRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, balance_cents, created_at, updated_at
                 FROM accounts WHERE id = ?1",
                [id.as_str()],
                |row| Ok(Self::from_row(row)),
            )
            .map_err(|_| StoreError::NotFound(format!("account {id}")))?
        })
    }

    /// Set the balance (settlement and admin flows call this).
    #[instrument(skip(self), fields(account_id = %id, balance_cents))]
    pub fn update_balance(
        &self,
        id: &AccountId,
        balance_cents: i64,
    ) -> Result<AccountRow, StoreError> {
        let now = Utc::now().to_rfc3339();

        let affected = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE accounts SET balance_cents = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![balance_cents, now, id.as_str()],
            )?)
        })?;

        if affected == 0 {
            return Err(StoreError::NotFound(format!("account {id}")));
        }

        let row = self.get(id)?;
        self.publish(ChangeOperation::Update, &row)?;
        Ok(row)
    }

    fn from_row(row: &rusqlite::Row<'_>) -> Result<AccountRow, StoreError> {
        Ok(AccountRow {
            id: AccountId::from_raw(row_helpers::get::<String>(row, 0, "accounts", "id")?),
            username: row_helpers::get(row, 1, "accounts", "username")?,
            balance_cents: row_helpers::get(row, 2, "accounts", "balance_cents")?,
            created_at: row_helpers::get(row, 3, "accounts", "created_at")?,
            updated_at: row_helpers::get(row, 4, "accounts", "updated_at")?,
        })
    }

    fn publish(&self, operation: ChangeOperation, row: &AccountRow) -> Result<(), StoreError> {
        self.feed.publish(ChangeNotification {
            collection: Collection::Accounts,
            operation,
            document_id: row.id.to_string(),
            document: Some(serde_json::to_value(row)?),
        });
        Ok(())
    }
}
