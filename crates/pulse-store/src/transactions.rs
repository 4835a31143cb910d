use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use pulse_core::events::{ChangeNotification, ChangeOperation, Collection};
use pulse_core::ids::{AccountId, TransactionId, WalletId};

use crate::database::Database;
use crate::error::StoreError;
use crate::feed::ChangeFeed;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Successful,
    Failed,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Successful => write!(f, "successful"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "successful" => Ok(Self::Successful),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Debit,
    Credit,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debit => write!(f, "debit"),
            Self::Credit => write!(f, "credit"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// A ledger entry. Amounts are signed cents.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionRow {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub wallet_id: Option<WalletId>,
    pub amount_cents: i64,
    pub status: TransactionStatus,
    pub direction: Direction,
    pub created_at: String,
    pub updated_at: String,
}

pub struct TransactionRepo {
    db: Database,
    feed: Arc<ChangeFeed>,
}

impl TransactionRepo {
    pub fn new(db: Database, feed: Arc<ChangeFeed>) -> Self {
        Self { db, feed }
    }

    /// Record a new ledger entry (deposit/withdrawal flows call this).
    /// Starts out pending.
    #[instrument(skip(self), fields(account_id = %account_id, amount_cents, direction = %direction))]
    pub fn create(
        &self,
        account_id: &AccountId,
        wallet_id: Option<&WalletId>,
        amount_cents: i64,
        direction: Direction,
    ) -> Result<TransactionRow, StoreError> {
        let id = TransactionId::new();
        let now = Utc::now().to_rfc3339();

        let row = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO transactions (id, account_id, wallet_id, amount_cents, status, direction, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7)",
                rusqlite::params![
                    id.as_str(),
                    account_id.as_str(),
                    wallet_id.map(|w| w.as_str()),
                    amount_cents,
                    direction.to_string(),
                    now,
                    now,
                ],
            )?;

            Ok(TransactionRow {
                id: id.clone(),
                account_id: account_id.clone(),
                wallet_id: wallet_id.cloned(),
                amount_cents,
                status: TransactionStatus::Pending,
                direction,
                created_at: now.clone(),
                updated_at: now,
            })
        })?;

        self.publish(ChangeOperation::Insert, &row)?;
        Ok(row)
    }

    /// Get a transaction by ID.
    #[instrument(skip(self), fields(transaction_id = %id))]
    pub fn get(&self, id: &TransactionId) -> Result<TransactionRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, account_id, wallet_id, amount_cents, status, direction, created_at, updated_at
                 FROM transactions WHERE id = ?1",
                [id.as_str()],
                |row| Ok(Self::from_row(row)),
            )
            .map_err(|_| StoreError::NotFound(format!("transaction {id}")))?
        })
    }

    /// Settle or fail a transaction (operational/admin flows call this).
    #[instrument(skip(self), fields(transaction_id = %id, status = %status))]
    pub fn update_status(
        &self,
        id: &TransactionId,
        status: TransactionStatus,
    ) -> Result<TransactionRow, StoreError> {
        let now = Utc::now().to_rfc3339();

        let affected = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE transactions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status.to_string(), now, id.as_str()],
            )?)
        })?;

        if affected == 0 {
            return Err(StoreError::NotFound(format!("transaction {id}")));
        }

        let row = self.get(id)?;
        self.publish(ChangeOperation::Update, &row)?;
        Ok(row)
    }

    /// All pending transactions, newest first. This is the snapshot a new
    /// stream subscriber receives.
    #[instrument(skip(self))]
    pub fn pending_newest_first(&self) -> Result<Vec<TransactionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, account_id, wallet_id, amount_cents, status, direction, created_at, updated_at
                 FROM transactions WHERE status = 'pending'
                 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt.query_map([], |row| Ok(Self::from_row(row)))?;
            rows.map(|r| r.map_err(StoreError::from).and_then(|inner| inner))
                .collect()
        })
    }

    fn from_row(row: &rusqlite::Row<'_>) -> Result<TransactionRow, StoreError> {
        let status_raw: String = row_helpers::get(row, 4, "transactions", "status")?;
        let direction_raw: String = row_helpers::get(row, 5, "transactions", "direction")?;
        Ok(TransactionRow {
            id: TransactionId::from_raw(row_helpers::get::<String>(row, 0, "transactions", "id")?),
            account_id: AccountId::from_raw(row_helpers::get::<String>(
                row,
                1,
                "transactions",
                "account_id",
            )?),
            wallet_id: row_helpers::get_opt::<String>(row, 2, "transactions", "wallet_id")?
                .map(WalletId::from_raw),
            amount_cents: row_helpers::get(row, 3, "transactions", "amount_cents")?,
            status: row_helpers::parse_enum(&status_raw, "transactions", "status")?,
            direction: row_helpers::parse_enum(&direction_raw, "transactions", "direction")?,
            created_at: row_helpers::get(row, 6, "transactions", "created_at")?,
            updated_at: row_helpers::get(row, 7, "transactions", "updated_at")?,
        })
    }

    fn publish(&self, operation: ChangeOperation, row: &TransactionRow) -> Result<(), StoreError> {
        self.feed.publish(ChangeNotification {
            collection: Collection::Transactions,
            operation,
            document_id: row.id.to_string(),
            document: Some(serde_json::to_value(row)?),
        });
        Ok(())
    }
}
