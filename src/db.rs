//! Application Database
//!
//! One SQLite file holds the payment history, credit balances, the plan
//! catalog and the generation gallery. The ledger needs history inserts and
//! balance updates on the same connection so both land in one transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{types::Type, Connection};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open credits db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("set busy timeout")?;

        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            internal_id TEXT PRIMARY KEY,
            external_transaction_id TEXT NOT NULL,
            is_placeholder INTEGER NOT NULL DEFAULT 0,
            sender_name TEXT,
            receipt_timestamp TEXT,
            amount INTEGER NOT NULL,
            user_id TEXT NOT NULL,
            receipt_digest TEXT,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Placeholder IDs are synthesized, so only real receipt IDs are unique.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_external_id
         ON transactions(external_transaction_id) WHERE is_placeholder = 0",
        [],
    )?;
    // Unknown sender/timestamp are stored as NULL and never collide.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_metadata
         ON transactions(sender_name, receipt_timestamp)
         WHERE sender_name IS NOT NULL AND receipt_timestamp IS NOT NULL",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_user_ts
         ON transactions(user_id, created_at DESC)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_ts ON transactions(created_at DESC)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS credit_balances (
            user_id TEXT PRIMARY KEY,
            credits INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0),
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS plans (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            price INTEGER NOT NULL CHECK (price > 0),
            credits INTEGER NOT NULL CHECK (credits > 0),
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS generations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            template TEXT NOT NULL,
            image_path TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_generations_user_ts
         ON generations(user_id, created_at DESC)",
        [],
    )?;

    Ok(())
}

pub(crate) fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn millis_to_utc(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

/// True when the error is a UNIQUE/CHECK constraint rejection
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_str().unwrap();

        Database::open(path).unwrap();
        let db = Database::open(path).unwrap();

        let conn = db.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('transactions', 'credit_balances', 'plans', 'generations')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn test_negative_balance_rejected_by_schema() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::open(temp.path().to_str().unwrap()).unwrap();
        let conn = db.lock().await;

        let err = conn
            .execute(
                "INSERT INTO credit_balances (user_id, credits, updated_at) VALUES ('u', -1, 0)",
                [],
            )
            .unwrap_err();
        assert!(is_constraint_violation(&err));
    }
}
