//! Reason codes and ledger errors

use serde::{Deserialize, Serialize};

/// Why a verification or spend attempt ended the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Accepted,
    AmountMismatch,
    ForgerySuspected,
    DuplicateId,
    DuplicateMetadata,
    /// Lost the insert race to a concurrent submission of the same receipt
    PersistenceConflict,
    InsufficientCredits,
    /// Vision service or storage unreachable; safe to retry
    TransportFailure,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Accepted => "ACCEPTED",
            ReasonCode::AmountMismatch => "AMOUNT_MISMATCH",
            ReasonCode::ForgerySuspected => "FORGERY_SUSPECTED",
            ReasonCode::DuplicateId => "DUPLICATE_ID",
            ReasonCode::DuplicateMetadata => "DUPLICATE_METADATA",
            ReasonCode::PersistenceConflict => "PERSISTENCE_CONFLICT",
            ReasonCode::InsufficientCredits => "INSUFFICIENT_CREDITS",
            ReasonCode::TransportFailure => "TRANSPORT_FAILURE",
        }
    }

    /// The code a user sees. A lost race reads as a plain duplicate.
    pub fn user_facing(self) -> Self {
        match self {
            ReasonCode::PersistenceConflict => ReasonCode::DuplicateId,
            other => other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ReasonCode::TransportFailure)
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which history uniqueness rule rejected an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    TransactionId,
    /// Same (sender, timestamp) pair under another ID
    Metadata,
}

/// Credit ledger failures
#[derive(Debug)]
pub enum LedgerError {
    /// A record with the same receipt ID or (sender, timestamp) pair was
    /// committed first
    PersistenceConflict {
        external_id: String,
        kind: ConflictKind,
    },
    InsufficientCredits { requested: i64, available: i64 },
    InvalidAmount(i64),
    Storage(anyhow::Error),
}

impl LedgerError {
    pub fn code(&self) -> ReasonCode {
        match self {
            LedgerError::PersistenceConflict { .. } => ReasonCode::PersistenceConflict,
            LedgerError::InsufficientCredits { .. } => ReasonCode::InsufficientCredits,
            LedgerError::InvalidAmount(_) | LedgerError::Storage(_) => ReasonCode::TransportFailure,
        }
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::PersistenceConflict {
                external_id,
                kind: ConflictKind::TransactionId,
            } => write!(f, "Transaction {external_id} was already recorded"),
            LedgerError::PersistenceConflict {
                external_id,
                kind: ConflictKind::Metadata,
            } => write!(
                f,
                "Receipt {external_id} matches an already recorded sender and timestamp"
            ),
            LedgerError::InsufficientCredits {
                requested,
                available,
            } => write!(
                f,
                "Insufficient credits: requested {requested}, available {available}"
            ),
            LedgerError::InvalidAmount(amount) => write!(f, "Invalid credit amount: {amount}"),
            LedgerError::Storage(e) => write!(f, "Ledger storage failure: {e:#}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Storage(e.into())
    }
}

impl From<anyhow::Error> for LedgerError {
    fn from(e: anyhow::Error) -> Self {
        LedgerError::Storage(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_code_serialization() {
        let json = serde_json::to_string(&ReasonCode::DuplicateMetadata).unwrap();
        assert_eq!(json, r#""DUPLICATE_METADATA""#);
        assert_eq!(ReasonCode::DuplicateMetadata.as_str(), "DUPLICATE_METADATA");
    }

    #[test]
    fn test_conflict_reads_as_duplicate_to_users() {
        assert_eq!(
            ReasonCode::PersistenceConflict.user_facing(),
            ReasonCode::DuplicateId
        );
        assert_eq!(
            ReasonCode::ForgerySuspected.user_facing(),
            ReasonCode::ForgerySuspected
        );
    }

    #[test]
    fn test_only_transport_failures_retry() {
        assert!(ReasonCode::TransportFailure.is_retryable());
        assert!(!ReasonCode::DuplicateId.is_retryable());
        assert!(!ReasonCode::AmountMismatch.is_retryable());
    }
}
