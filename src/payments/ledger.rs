//! Credit Ledger
//!
//! The only writer of credit balances and the only path into transaction
//! history. Every mutation is a single SQLite statement or transaction on the
//! shared connection, so there is no read-then-write window.

use crate::auth::models::{Claims, UserRole};
use crate::db::{is_constraint_violation, parse_uuid, Database};
use crate::payments::error::{ConflictKind, LedgerError};
use crate::payments::history::{NewTransaction, TransactionHistory, TransactionRecord};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of a committed grant
#[derive(Debug, Clone)]
pub struct Grant {
    pub record: TransactionRecord,
    pub new_balance: i64,
}

#[derive(Clone)]
pub struct CreditLedger {
    db: Database,
}

impl CreditLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the zero balance row for a new user. No-op if it exists.
    pub async fn open_account(&self, user_id: Uuid) -> Result<(), LedgerError> {
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO credit_balances (user_id, credits, updated_at) VALUES (?1, 0, ?2)",
            params![user_id.to_string(), Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<i64, LedgerError> {
        let conn = self.db.lock().await;
        Ok(current_balance(&conn, user_id)?)
    }

    /// Record the transaction and add `credits` to the balance, atomically.
    ///
    /// The uniqueness indexes on the history table are the real duplicate
    /// guard here: a concurrent submission that already committed the same
    /// receipt makes this fail with `PersistenceConflict` and nothing is
    /// written.
    pub async fn grant(
        &self,
        user_id: Uuid,
        new: &NewTransaction,
        credits: i64,
    ) -> Result<Grant, LedgerError> {
        if credits <= 0 {
            return Err(LedgerError::InvalidAmount(credits));
        }

        let mut conn = self.db.lock().await;
        let now = Utc::now();
        let tx = conn.transaction()?;

        let record = match TransactionHistory::append(&tx, user_id, new, now) {
            Ok(record) => record,
            Err(e) if is_constraint_violation(&e) => {
                let kind = conflict_kind(&e);
                warn!(
                    user_id = %user_id,
                    external_id = %new.external_transaction_id,
                    kind = ?kind,
                    "grant lost uniqueness race, nothing written"
                );
                return Err(LedgerError::PersistenceConflict {
                    external_id: new.external_transaction_id.clone(),
                    kind,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let new_balance: i64 = tx.query_row(
            "INSERT INTO credit_balances (user_id, credits, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                credits = credits + excluded.credits,
                updated_at = excluded.updated_at
             RETURNING credits",
            params![user_id.to_string(), credits, now.timestamp()],
            |row| row.get(0),
        )?;

        tx.commit()?;

        info!(
            user_id = %user_id,
            external_id = %record.external_transaction_id,
            credits,
            new_balance,
            "💳 Credits granted"
        );

        Ok(Grant {
            record,
            new_balance,
        })
    }

    /// Spend credits. Fails without touching the balance if it would go
    /// negative.
    pub async fn debit(&self, user_id: Uuid, amount: i64) -> Result<i64, LedgerError> {
        let (new_balance, ()) = self.spend(user_id, amount, |_| Ok(())).await?;
        Ok(new_balance)
    }

    /// Debit and run `also` in the same SQLite transaction. Either both
    /// commit or neither does; `also` never runs when the debit is refused.
    pub async fn spend<T, F>(
        &self,
        user_id: Uuid,
        amount: i64,
        also: F,
    ) -> Result<(i64, T), LedgerError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        let updated: Option<i64> = tx
            .query_row(
                "UPDATE credit_balances SET credits = credits - ?1, updated_at = ?2
                 WHERE user_id = ?3 AND credits >= ?1
                 RETURNING credits",
                params![amount, Utc::now().timestamp(), user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(new_balance) = updated else {
            let available = current_balance(&*tx, user_id)?;
            warn!(user_id = %user_id, requested = amount, available, "debit refused");
            return Err(LedgerError::InsufficientCredits {
                requested: amount,
                available,
            });
        };

        let extra = also(&*tx)?;
        tx.commit()?;

        Ok((new_balance, extra))
    }
}

/// SQLite names the violated columns in the error message
fn conflict_kind(e: &rusqlite::Error) -> ConflictKind {
    match e {
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("external_transaction_id") => {
            ConflictKind::TransactionId
        }
        _ => ConflictKind::Metadata,
    }
}

fn current_balance(conn: &Connection, user_id: Uuid) -> rusqlite::Result<i64> {
    Ok(conn
        .query_row(
            "SELECT credits FROM credit_balances WHERE user_id = ?1",
            params![user_id.to_string()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .unwrap_or(0))
}

/// Proof that the caller is allowed to use privileged ledger operations
#[derive(Debug, Clone)]
pub struct AdminActor {
    name: String,
}

impl AdminActor {
    /// Only admin tokens qualify
    pub fn from_claims(claims: &Claims) -> Option<Self> {
        (claims.role == UserRole::Admin).then(|| Self {
            name: claims.email.clone(),
        })
    }

    /// Operator of a tool with direct database access (the admin CLI)
    pub fn local_operator(name: &str) -> Self {
        Self {
            name: format!("local:{name}"),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Privileged balance operations, kept apart from the user-facing ledger
#[derive(Clone)]
pub struct AdminLedger {
    db: Database,
}

impl AdminLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Unconditional override for support corrections
    pub async fn set_balance(
        &self,
        actor: &AdminActor,
        user_id: Uuid,
        new_balance: i64,
    ) -> Result<i64, LedgerError> {
        if new_balance < 0 {
            return Err(LedgerError::InvalidAmount(new_balance));
        }

        let conn = self.db.lock().await;
        let previous = current_balance(&conn, user_id)?;
        let stored: i64 = conn.query_row(
            "INSERT INTO credit_balances (user_id, credits, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                credits = excluded.credits,
                updated_at = excluded.updated_at
             RETURNING credits",
            params![user_id.to_string(), new_balance, Utc::now().timestamp()],
            |row| row.get(0),
        )?;

        warn!(
            actor = actor.name(),
            user_id = %user_id,
            previous,
            new_balance = stored,
            "🛠️ Admin balance override"
        );

        Ok(stored)
    }

    /// All balances, highest first
    pub async fn list_balances(&self) -> Result<Vec<(Uuid, i64)>, LedgerError> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT user_id, credits FROM credit_balances ORDER BY credits DESC, user_id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let id = parse_uuid(0, &row.get::<_, String>(0)?)?;
                Ok((id, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::error::ReasonCode;
    use crate::payments::history::placeholder_id;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn create_test_ledger() -> (CreditLedger, TransactionHistory, AdminLedger, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::open(temp.path().to_str().unwrap()).unwrap();
        (
            CreditLedger::new(db.clone()),
            TransactionHistory::new(db.clone()),
            AdminLedger::new(db),
            temp,
        )
    }

    fn receipt(id: &str, sender: Option<&str>, ts: Option<&str>) -> NewTransaction {
        NewTransaction {
            external_transaction_id: id.to_string(),
            is_placeholder: false,
            sender_name: sender.map(str::to_string),
            receipt_timestamp_text: ts.map(str::to_string),
            amount: 699,
            receipt_digest: None,
        }
    }

    #[tokio::test]
    async fn test_new_account_starts_at_zero() {
        let (ledger, _, _, _temp) = create_test_ledger();
        let user = Uuid::new_v4();
        ledger.open_account(user).await.unwrap();
        ledger.open_account(user).await.unwrap();
        assert_eq!(ledger.balance(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_grant_records_and_credits_together() {
        let (ledger, history, _, _temp) = create_test_ledger();
        let user = Uuid::new_v4();
        ledger.open_account(user).await.unwrap();

        let grant = ledger
            .grant(user, &receipt("ABC123", Some("Sana"), Some("1 Nov 9:00AM")), 12)
            .await
            .unwrap();
        assert_eq!(grant.new_balance, 12);
        assert_eq!(grant.record.user_id, user);
        assert_eq!(ledger.balance(user).await.unwrap(), 12);

        let rows = history.list_for_user(user, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].internal_id, grant.record.internal_id);
    }

    #[tokio::test]
    async fn test_duplicate_grant_writes_nothing() {
        let (ledger, history, _, _temp) = create_test_ledger();
        let user = Uuid::new_v4();

        ledger.grant(user, &receipt("TX100", None, None), 12).await.unwrap();
        let err = ledger
            .grant(user, &receipt("TX100", None, None), 12)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::PersistenceConflict {
                kind: ConflictKind::TransactionId,
                ..
            }
        ));
        assert_eq!(ledger.balance(user).await.unwrap(), 12);
        assert_eq!(history.list_all(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_collision_enforced_at_insert() {
        let (ledger, _, _, _temp) = create_test_ledger();
        let user = Uuid::new_v4();

        ledger
            .grant(user, &receipt("TX100", Some("Ali Khan"), Some("23 Oct, 10:30 PM")), 12)
            .await
            .unwrap();
        let err = ledger
            .grant(user, &receipt("TX999", Some("Ali Khan"), Some("23 Oct, 10:30 PM")), 12)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::PersistenceConflict {
                kind: ConflictKind::Metadata,
                ..
            }
        ));
        assert_eq!(ledger.balance(user).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_placeholder_ids_do_not_conflict() {
        let (ledger, _, _, _temp) = create_test_ledger();
        let user = Uuid::new_v4();
        let id = placeholder_id(Utc::now());

        for _ in 0..2 {
            let tx = NewTransaction {
                external_transaction_id: id.clone(),
                is_placeholder: true,
                sender_name: None,
                receipt_timestamp_text: None,
                amount: 699,
                receipt_digest: None,
            };
            ledger.grant(user, &tx, 12).await.unwrap();
        }
        assert_eq!(ledger.balance(user).await.unwrap(), 24);
    }

    #[tokio::test]
    async fn test_concurrent_grants_same_receipt_credit_once() {
        let (ledger, history, _, _temp) = create_test_ledger();
        let ledger = Arc::new(ledger);
        let user = Uuid::new_v4();
        ledger.open_account(user).await.unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .grant(user, &receipt("TX100", Some("Sana"), Some("1 Nov 9:00AM")), 12)
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        let mut conflicts = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::PersistenceConflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(conflicts, 1);
        assert_eq!(ledger.balance(user).await.unwrap(), 12);
        assert_eq!(history.list_all(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_debit_never_goes_negative() {
        let (ledger, _, _, _temp) = create_test_ledger();
        let user = Uuid::new_v4();
        ledger.grant(user, &receipt("TX1", None, None), 2).await.unwrap();

        assert_eq!(ledger.debit(user, 1).await.unwrap(), 1);

        let err = ledger.debit(user, 5).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientCredits {
                requested: 5,
                available: 1
            }
        ));
        assert_eq!(ledger.balance(user).await.unwrap(), 1);

        assert_eq!(ledger.debit(user, 1).await.unwrap(), 0);
        assert!(ledger.debit(user, 1).await.is_err());
        assert_eq!(ledger.balance(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_debit_unknown_account_is_insufficient() {
        let (ledger, _, _, _temp) = create_test_ledger();
        let err = ledger.debit(Uuid::new_v4(), 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCredits { available: 0, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_debits_serialize() {
        let (ledger, _, _, _temp) = create_test_ledger();
        let ledger = Arc::new(ledger);
        let user = Uuid::new_v4();
        ledger.grant(user, &receipt("TX1", None, None), 5).await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.debit(user, 1).await })
            })
            .collect();

        let mut ok = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 5);
        assert_eq!(ledger.balance(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_spend_side_effect_rolls_back_with_debit() {
        let (ledger, _, _, _temp) = create_test_ledger();
        let user = Uuid::new_v4();
        ledger.grant(user, &receipt("TX1", None, None), 2).await.unwrap();

        // Failing side effect leaves the balance untouched
        let err = ledger
            .spend(user, 1, |conn| {
                conn.execute("INSERT INTO no_such_table VALUES (1)", [])
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
        assert_eq!(ledger.balance(user).await.unwrap(), 2);

        let (balance, value) = ledger.spend(user, 1, |_| Ok("done")).await.unwrap();
        assert_eq!((balance, value), (1, "done"));

        // Refused debit never runs the side effect
        let mut ran = false;
        let err = ledger
            .spend(user, 5, |_| {
                ran = true;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCredits { .. }));
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_balance_write_failure_rolls_back_record() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::open(temp.path().to_str().unwrap()).unwrap();
        let ledger = CreditLedger::new(db.clone());
        let history = TransactionHistory::new(db.clone());
        let user = Uuid::new_v4();
        ledger.grant(user, &receipt("TX1", None, None), 2).await.unwrap();

        db.lock()
            .await
            .execute_batch(
                "CREATE TRIGGER fail_balance_insert BEFORE INSERT ON credit_balances
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;
                 CREATE TRIGGER fail_balance_update BEFORE UPDATE ON credit_balances
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let err = ledger
            .grant(user, &receipt("TX2", Some("Sana"), Some("1 Nov 9:00AM")), 12)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
        assert_eq!(err.code(), ReasonCode::TransportFailure);

        assert_eq!(ledger.balance(user).await.unwrap(), 2);
        assert_eq!(history.list_all(10).await.unwrap().len(), 1);
        assert!(history.find_by_external_id("TX2").await.unwrap().is_none());

        // Same receipt goes through once storage recovers
        db.lock()
            .await
            .execute_batch(
                "DROP TRIGGER fail_balance_insert; DROP TRIGGER fail_balance_update;",
            )
            .unwrap();
        let grant = ledger
            .grant(user, &receipt("TX2", Some("Sana"), Some("1 Nov 9:00AM")), 12)
            .await
            .unwrap();
        assert_eq!(grant.new_balance, 14);
    }

    #[tokio::test]
    async fn test_invalid_amounts_rejected() {
        let (ledger, _, admin, _temp) = create_test_ledger();
        let user = Uuid::new_v4();
        assert!(matches!(
            ledger.grant(user, &receipt("TX1", None, None), 0).await,
            Err(LedgerError::InvalidAmount(0))
        ));
        assert!(matches!(
            ledger.debit(user, -3).await,
            Err(LedgerError::InvalidAmount(-3))
        ));
        let actor = AdminActor::local_operator("test");
        assert!(matches!(
            admin.set_balance(&actor, user, -1).await,
            Err(LedgerError::InvalidAmount(-1))
        ));
    }

    #[tokio::test]
    async fn test_admin_override_sets_exact_balance() {
        let (ledger, _, admin, _temp) = create_test_ledger();
        let user = Uuid::new_v4();
        ledger.grant(user, &receipt("TX1", None, None), 12).await.unwrap();

        let actor = AdminActor::local_operator("support");
        assert_eq!(admin.set_balance(&actor, user, 3).await.unwrap(), 3);
        assert_eq!(ledger.balance(user).await.unwrap(), 3);

        let other = Uuid::new_v4();
        assert_eq!(admin.set_balance(&actor, other, 7).await.unwrap(), 7);

        let balances = admin.list_balances().await.unwrap();
        assert_eq!(balances, vec![(other, 7), (user, 3)]);
    }

    #[test]
    fn test_admin_actor_requires_admin_role() {
        let member = Claims {
            sub: Uuid::new_v4().to_string(),
            email: "user@example.com".to_string(),
            role: UserRole::Member,
            exp: 0,
        };
        assert!(AdminActor::from_claims(&member).is_none());

        let admin = Claims {
            role: UserRole::Admin,
            email: "admin@selfiepro.com".to_string(),
            ..member
        };
        assert_eq!(
            AdminActor::from_claims(&admin).unwrap().name(),
            "admin@selfiepro.com"
        );
    }
}
