//! Transaction History Store
//!
//! Append-only log of accepted receipts. Inserts happen only through the
//! credit ledger; everything here is a point-in-time read.

use crate::db::{millis_to_utc, parse_uuid, Database};
use crate::payments::claim::{sentinel, VerificationClaim};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of synthesized IDs for receipts whose ID could not be read
pub const PLACEHOLDER_PREFIX: &str = "MANUAL-";

/// Accepted, immutable receipt record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub internal_id: Uuid,
    pub external_transaction_id: String,
    pub is_placeholder: bool,
    #[serde(with = "sentinel")]
    pub sender_name: Option<String>,
    #[serde(with = "sentinel")]
    pub receipt_timestamp_text: Option<String>,
    pub amount: i64,
    pub user_id: Uuid,
    pub receipt_digest: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A record about to be committed. Internal ID and `created_at` are
/// assigned by the ledger at insert time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub external_transaction_id: String,
    pub is_placeholder: bool,
    pub sender_name: Option<String>,
    pub receipt_timestamp_text: Option<String>,
    pub amount: i64,
    pub receipt_digest: Option<String>,
}

impl NewTransaction {
    pub fn from_claim(
        claim: &VerificationClaim,
        amount: i64,
        receipt_digest: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let (external_transaction_id, is_placeholder) = match &claim.transaction_id {
            Some(id) => (id.clone(), false),
            None => (placeholder_id(now), true),
        };

        Self {
            external_transaction_id,
            is_placeholder,
            sender_name: claim.sender_name.clone(),
            receipt_timestamp_text: claim.timestamp_text.clone(),
            amount,
            receipt_digest,
        }
    }
}

pub fn placeholder_id(now: DateTime<Utc>) -> String {
    format!("{PLACEHOLDER_PREFIX}{}", now.timestamp_millis())
}

const RECORD_COLUMNS: &str = "internal_id, external_transaction_id, is_placeholder, sender_name, \
     receipt_timestamp, amount, user_id, receipt_digest, created_at";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
    Ok(TransactionRecord {
        internal_id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        external_transaction_id: row.get(1)?,
        is_placeholder: row.get::<_, i64>(2)? == 1,
        sender_name: row.get(3)?,
        receipt_timestamp_text: row.get(4)?,
        amount: row.get(5)?,
        user_id: parse_uuid(6, &row.get::<_, String>(6)?)?,
        receipt_digest: row.get(7)?,
        created_at: millis_to_utc(8, row.get(8)?)?,
    })
}

#[derive(Clone)]
pub struct TransactionHistory {
    db: Database,
}

impl TransactionHistory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a record on an open connection/transaction. Uniqueness is
    /// enforced by the schema; a collision surfaces as a constraint error.
    pub(crate) fn append(
        conn: &Connection,
        user_id: Uuid,
        new: &NewTransaction,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<TransactionRecord> {
        let record = TransactionRecord {
            internal_id: Uuid::new_v4(),
            external_transaction_id: new.external_transaction_id.clone(),
            is_placeholder: new.is_placeholder,
            sender_name: new.sender_name.clone(),
            receipt_timestamp_text: new.receipt_timestamp_text.clone(),
            amount: new.amount,
            user_id,
            receipt_digest: new.receipt_digest.clone(),
            created_at: now,
        };

        conn.execute(
            "INSERT INTO transactions \
             (internal_id, external_transaction_id, is_placeholder, sender_name, receipt_timestamp, amount, user_id, receipt_digest, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.internal_id.to_string(),
                &record.external_transaction_id,
                record.is_placeholder as i64,
                record.sender_name.as_deref(),
                record.receipt_timestamp_text.as_deref(),
                record.amount,
                record.user_id.to_string(),
                record.receipt_digest.as_deref(),
                record.created_at.timestamp_millis(),
            ],
        )?;

        Ok(record)
    }

    /// Record carrying this real receipt ID, if any. Placeholders never match.
    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<TransactionRecord>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM transactions \
             WHERE external_transaction_id = ?1 AND is_placeholder = 0 LIMIT 1"
        ))?;
        Ok(stmt.query_row(params![external_id], row_to_record).optional()?)
    }

    /// Record with exactly this (sender, receipt timestamp) pair, if any
    pub async fn find_by_metadata(
        &self,
        sender_name: &str,
        timestamp_text: &str,
    ) -> Result<Option<TransactionRecord>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM transactions \
             WHERE sender_name = ?1 AND receipt_timestamp = ?2 LIMIT 1"
        ))?;
        Ok(stmt
            .query_row(params![sender_name, timestamp_text], row_to_record)
            .optional()?)
    }

    /// The records a claim could collide with: same receipt ID, or same
    /// known (sender, timestamp) pair. Unknown fields are not queried.
    pub async fn candidates_for(&self, claim: &VerificationClaim) -> Result<Vec<TransactionRecord>> {
        let mut out = Vec::new();

        if let Some(id) = claim.transaction_id.as_deref() {
            if let Some(rec) = self.find_by_external_id(id).await? {
                out.push(rec);
            }
        }

        if let Some((sender, ts)) = claim.metadata_fingerprint() {
            if let Some(rec) = self.find_by_metadata(sender, ts).await? {
                if !out.iter().any(|r| r.internal_id == rec.internal_id) {
                    out.push(rec);
                }
            }
        }

        Ok(out)
    }

    /// A user's records, newest first
    pub async fn list_for_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<TransactionRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = limit.min(1000) as i64;
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM transactions \
             WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![user_id.to_string(), limit], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every record, newest first (admin view)
    pub async fn list_all(&self, limit: usize) -> Result<Vec<TransactionRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = limit.min(10_000) as i64;
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM transactions \
             ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
