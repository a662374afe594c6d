//! Fraud / Duplicate Detector
//!
//! Pure, synchronous rule evaluation over a claim and a history snapshot.
//! Rules run in a fixed order and the first failure wins:
//!
//! 1. amount outside tolerance        -> `AMOUNT_MISMATCH`
//! 2. forgery signal                  -> `FORGERY_SUSPECTED`
//! 3. receipt ID already used         -> `DUPLICATE_ID`
//! 4. same sender + exact timestamp   -> `DUPLICATE_METADATA`
//!
//! Rule 4 catches resubmissions where only the ID was retouched: the ID is
//! the easiest field to edit on a screenshot, sender + timestamp together
//! are not.

use crate::payments::claim::VerificationClaim;
use crate::payments::error::ReasonCode;
use crate::payments::history::TransactionRecord;
use serde::Serialize;
use tracing::debug;

/// A rejected claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub code: ReasonCode,
    pub message: String,
}

impl Rejection {
    fn new(code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept { credits_to_grant: i64 },
    Reject(Rejection),
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept { .. })
    }

    pub fn code(&self) -> ReasonCode {
        match self {
            Decision::Accept { .. } => ReasonCode::Accepted,
            Decision::Reject(r) => r.code,
        }
    }
}

/// What the claim is checked against
#[derive(Debug, Clone, Copy)]
pub struct PurchaseTerms {
    pub expected_amount: i64,
    pub tolerance: i64,
    pub credits_to_grant: i64,
}

pub fn evaluate(
    claim: &VerificationClaim,
    terms: &PurchaseTerms,
    history: &[TransactionRecord],
) -> Decision {
    if !claim.amount_verified {
        debug!(
            confidence = claim.confidence,
            expected = terms.expected_amount,
            tolerance = terms.tolerance,
            "amount check failed"
        );
        return Decision::Reject(Rejection::new(
            ReasonCode::AmountMismatch,
            format!(
                "Verification failed: {} (Confidence: {}%). Expected Rs. {} (±{}).",
                claim.reason.trim(),
                claim.confidence,
                terms.expected_amount,
                terms.tolerance
            ),
        ));
    }

    // No confidence score overrides this.
    if claim.is_edited {
        return Decision::Reject(Rejection::new(
            ReasonCode::ForgerySuspected,
            "We detected signs of digital editing on this receipt. \
             Please upload the original, unedited screenshot.",
        ));
    }

    if let Some(tx_id) = claim.transaction_id.as_deref() {
        let used = history
            .iter()
            .any(|r| !r.is_placeholder && r.external_transaction_id == tx_id);
        if used {
            return Decision::Reject(Rejection::new(
                ReasonCode::DuplicateId,
                format!("This Transaction ID ({tx_id}) has already been used."),
            ));
        }
    }

    if let Some((sender, ts)) = claim.metadata_fingerprint() {
        let collision = history.iter().find(|r| {
            r.sender_name.as_deref() == Some(sender)
                && r.receipt_timestamp_text.as_deref() == Some(ts)
        });
        if let Some(existing) = collision {
            debug!(
                existing_id = %existing.external_transaction_id,
                claimed_id = ?claim.transaction_id,
                "metadata collision"
            );
            return Decision::Reject(Rejection::new(
                ReasonCode::DuplicateMetadata,
                "A transaction with this exact timestamp and sender was already processed \
                 under a different ID. This receipt appears to be edited.",
            ));
        }
    }

    Decision::Accept {
        credits_to_grant: terms.credits_to_grant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    const TERMS: PurchaseTerms = PurchaseTerms {
        expected_amount: 699,
        tolerance: 100,
        credits_to_grant: 12,
    };

    fn claim(id: Option<&str>, sender: Option<&str>, ts: Option<&str>) -> VerificationClaim {
        VerificationClaim {
            amount_verified: true,
            confidence: 92,
            reason: "Amount within range".to_string(),
            transaction_id: id.map(str::to_string),
            sender_name: sender.map(str::to_string),
            timestamp_text: ts.map(str::to_string),
            is_edited: false,
        }
    }

    fn record(id: &str, sender: Option<&str>, ts: Option<&str>) -> TransactionRecord {
        TransactionRecord {
            internal_id: Uuid::new_v4(),
            external_transaction_id: id.to_string(),
            is_placeholder: id.starts_with("MANUAL-"),
            sender_name: sender.map(str::to_string),
            receipt_timestamp_text: ts.map(str::to_string),
            amount: 699,
            user_id: Uuid::new_v4(),
            receipt_digest: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_clean_claim_accepted_with_plan_credits() {
        let decision = evaluate(&claim(Some("ABC123"), Some("Sana"), Some("1 Nov 9:00AM")), &TERMS, &[]);
        assert_eq!(decision, Decision::Accept { credits_to_grant: 12 });
    }

    #[test]
    fn test_amount_mismatch_reports_confidence_and_reason() {
        let mut c = claim(Some("ABC123"), None, None);
        c.amount_verified = false;
        c.confidence = 40;
        c.reason = "Amount shows Rs. 300".to_string();

        let Decision::Reject(r) = evaluate(&c, &TERMS, &[]) else {
            panic!("expected rejection");
        };
        assert_eq!(r.code, ReasonCode::AmountMismatch);
        assert!(r.message.contains("40%"));
        assert!(r.message.contains("Amount shows Rs. 300"));
    }

    #[test]
    fn test_edited_receipt_rejected_at_any_confidence() {
        for confidence in [0u8, 50, 99, 100] {
            let mut c = claim(Some("ABC123"), Some("Sana"), Some("1 Nov 9:00AM"));
            c.is_edited = true;
            c.confidence = confidence;
            assert_eq!(
                evaluate(&c, &TERMS, &[]).code(),
                ReasonCode::ForgerySuspected,
                "confidence {confidence}"
            );
        }
    }

    #[test]
    fn test_amount_check_runs_before_forgery_check() {
        let mut c = claim(Some("ABC123"), None, None);
        c.amount_verified = false;
        c.is_edited = true;
        assert_eq!(evaluate(&c, &TERMS, &[]).code(), ReasonCode::AmountMismatch);
    }

    #[test]
    fn test_forgery_check_runs_before_duplicate_checks() {
        let history = vec![record("TX100", Some("Ali Khan"), Some("23 Oct, 10:30 PM"))];
        let mut c = claim(Some("TX100"), Some("Ali Khan"), Some("23 Oct, 10:30 PM"));
        c.is_edited = true;
        assert_eq!(evaluate(&c, &TERMS, &history).code(), ReasonCode::ForgerySuspected);
    }

    #[test]
    fn test_exact_id_duplicate() {
        let history = vec![record("TX100", None, None)];
        let Decision::Reject(r) = evaluate(&claim(Some("TX100"), None, None), &TERMS, &history) else {
            panic!("expected rejection");
        };
        assert_eq!(r.code, ReasonCode::DuplicateId);
        assert!(r.message.contains("TX100"));
    }

    #[test]
    fn test_id_check_runs_before_metadata_check() {
        let history = vec![record("TX100", Some("Ali Khan"), Some("23 Oct, 10:30 PM"))];
        let c = claim(Some("TX100"), Some("Ali Khan"), Some("23 Oct, 10:30 PM"));
        assert_eq!(evaluate(&c, &TERMS, &history).code(), ReasonCode::DuplicateId);
    }

    #[test]
    fn test_metadata_collision_with_retouched_id() {
        let history = vec![record("TX100", Some("Ali Khan"), Some("23 Oct, 10:30 PM"))];
        let c = claim(Some("TX999"), Some("Ali Khan"), Some("23 Oct, 10:30 PM"));
        assert_eq!(evaluate(&c, &TERMS, &history).code(), ReasonCode::DuplicateMetadata);
    }

    #[test]
    fn test_metadata_collision_when_claim_id_unknown() {
        let history = vec![record("TX100", Some("Ali Khan"), Some("23 Oct, 10:30 PM"))];
        let c = claim(None, Some("Ali Khan"), Some("23 Oct, 10:30 PM"));
        assert_eq!(evaluate(&c, &TERMS, &history).code(), ReasonCode::DuplicateMetadata);
    }

    #[test]
    fn test_unknown_fields_never_collide() {
        let history = vec![
            record("MANUAL-1700000000000", None, None),
            record("TX200", Some("Sana"), None),
            record("TX201", None, Some("1 Nov 9:00AM")),
        ];
        assert!(evaluate(&claim(None, None, None), &TERMS, &history).is_accept());
        // Half-known fingerprints are skipped entirely
        assert!(evaluate(&claim(None, Some("Sana"), None), &TERMS, &history).is_accept());
        assert!(evaluate(&claim(None, None, Some("1 Nov 9:00AM")), &TERMS, &history).is_accept());
    }

    #[test]
    fn test_placeholder_ids_never_block() {
        let history = vec![record("MANUAL-1700000000000", None, None)];
        let c = claim(Some("MANUAL-1700000000000"), None, None);
        assert!(evaluate(&c, &TERMS, &history).is_accept());
    }

    #[test]
    fn test_timestamp_formatting_differences_do_not_collapse() {
        let history = vec![record("TX100", Some("Ali Khan"), Some("23 Oct, 10:30 PM"))];
        let c = claim(Some("TX999"), Some("Ali Khan"), Some("23 Oct 10:30 PM"));
        assert!(evaluate(&c, &TERMS, &history).is_accept());
    }
}
