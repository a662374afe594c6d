//! Receipt Verification Pipeline
//!
//! request -> vision adapter -> detector (history snapshot) -> ledger grant.
//!
//! Every failure is mapped to a reason code here. Nothing is written unless
//! the ledger grant commits, so a timed-out or failed attempt can be retried
//! with the same receipt.

use crate::payments::analyzer::ReceiptAnalyzer;
use crate::payments::detector::{self, Decision, PurchaseTerms};
use crate::payments::error::{ConflictKind, LedgerError, ReasonCode};
use crate::payments::history::{NewTransaction, TransactionHistory, TransactionRecord};
use crate::payments::ledger::CreditLedger;
use crate::payments::plans::Plan;
use crate::payments::tracking::PurchaseTracker;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CURRENCY: &str = "PKR";

const ANALYSIS_UNAVAILABLE: &str =
    "Receipt analysis is unavailable right now. Nothing was charged; please try again.";

#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub user_id: Uuid,
    pub plan: Plan,
    pub tolerance: i64,
    pub receipt_image: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub decision: Verdict,
    pub reason_code: ReasonCode,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_granted: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_record: Option<TransactionRecord>,
    /// Ledger balance after the grant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
}

impl VerificationResponse {
    fn rejected(code: ReasonCode, message: impl Into<String>) -> Self {
        let code = code.user_facing();
        Self {
            decision: Verdict::Reject,
            reason_code: code,
            message: message.into(),
            retryable: code.is_retryable(),
            credits_granted: None,
            transaction_record: None,
            balance: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.decision == Verdict::Accept
    }
}

/// Only a clash on the receipt ID itself names the ID back to the user
fn conflict_message(new_tx: &NewTransaction, kind: ConflictKind) -> String {
    match kind {
        ConflictKind::TransactionId if !new_tx.is_placeholder => format!(
            "This Transaction ID ({}) has already been used.",
            new_tx.external_transaction_id
        ),
        _ => "This receipt was already processed.".to_string(),
    }
}

/// Hex SHA-256 of the uploaded receipt, kept on the record for audits
pub fn receipt_digest(image: &[u8]) -> String {
    hex::encode(Sha256::digest(image))
}

#[derive(Clone)]
pub struct ReceiptVerifier {
    analyzer: Arc<dyn ReceiptAnalyzer>,
    history: TransactionHistory,
    ledger: CreditLedger,
    tracker: Arc<PurchaseTracker>,
    analysis_timeout: Duration,
}

impl ReceiptVerifier {
    pub fn new(
        analyzer: Arc<dyn ReceiptAnalyzer>,
        history: TransactionHistory,
        ledger: CreditLedger,
        tracker: Arc<PurchaseTracker>,
        analysis_timeout: Duration,
    ) -> Self {
        Self {
            analyzer,
            history,
            ledger,
            tracker,
            analysis_timeout,
        }
    }

    pub async fn verify(&self, req: VerificationRequest) -> VerificationResponse {
        let user_id = req.user_id;
        let terms = PurchaseTerms {
            expected_amount: req.plan.price,
            tolerance: req.tolerance,
            credits_to_grant: req.plan.credits,
        };

        let analysis = tokio::time::timeout(
            self.analysis_timeout,
            self.analyzer.extract(
                &req.receipt_image,
                &req.mime_type,
                terms.expected_amount,
                terms.tolerance,
            ),
        )
        .await;

        let claim = match analysis {
            Ok(Ok(claim)) => claim,
            Ok(Err(e)) => {
                warn!(user_id = %user_id, error = %format!("{e:#}"), "receipt analysis failed");
                return VerificationResponse::rejected(ReasonCode::TransportFailure, ANALYSIS_UNAVAILABLE);
            }
            Err(_) => {
                warn!(
                    user_id = %user_id,
                    timeout_ms = self.analysis_timeout.as_millis() as u64,
                    "receipt analysis timed out"
                );
                return VerificationResponse::rejected(ReasonCode::TransportFailure, ANALYSIS_UNAVAILABLE);
            }
        };

        info!(
            user_id = %user_id,
            plan = %req.plan.id,
            verified = claim.amount_verified,
            confidence = claim.confidence,
            "claim received"
        );

        let candidates = match self.history.candidates_for(&claim).await {
            Ok(c) => c,
            Err(e) => {
                error!(user_id = %user_id, error = %format!("{e:#}"), "history lookup failed");
                return VerificationResponse::rejected(ReasonCode::TransportFailure, ANALYSIS_UNAVAILABLE);
            }
        };

        let credits = match detector::evaluate(&claim, &terms, &candidates) {
            Decision::Accept { credits_to_grant } => credits_to_grant,
            Decision::Reject(rejection) => {
                info!(user_id = %user_id, code = %rejection.code, "🚫 Receipt rejected");
                return VerificationResponse::rejected(rejection.code, rejection.message);
            }
        };

        let new_tx = NewTransaction::from_claim(
            &claim,
            terms.expected_amount,
            Some(receipt_digest(&req.receipt_image)),
            Utc::now(),
        );

        match self.ledger.grant(user_id, &new_tx, credits).await {
            Ok(grant) => {
                self.tracker.record_purchase(
                    &grant.record.external_transaction_id,
                    grant.record.amount,
                    CURRENCY,
                );
                info!(
                    user_id = %user_id,
                    external_id = %grant.record.external_transaction_id,
                    credits,
                    balance = grant.new_balance,
                    "✅ Receipt accepted"
                );
                VerificationResponse {
                    decision: Verdict::Accept,
                    reason_code: ReasonCode::Accepted,
                    message: format!("Payment verified. {credits} credits added to your account."),
                    retryable: false,
                    credits_granted: Some(credits),
                    transaction_record: Some(grant.record),
                    balance: Some(grant.new_balance),
                }
            }
            Err(e @ LedgerError::PersistenceConflict { kind, .. }) => {
                VerificationResponse::rejected(e.code(), conflict_message(&new_tx, kind))
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "grant failed, nothing written");
                VerificationResponse::rejected(ReasonCode::TransportFailure, ANALYSIS_UNAVAILABLE)
            }
        }
    }
}
