//! Credit purchases by receipt upload
//!
//! The vision adapter reads a receipt, the detector decides, and the ledger
//! is the only component that writes balances or history.

pub mod analyzer;
pub mod claim;
pub mod detector;
pub mod error;
pub mod history;
pub mod ledger;
pub mod plans;
pub mod tracking;
pub mod verifier;

pub use analyzer::{DisabledAnalyzer, GeminiReceiptAnalyzer, ReceiptAnalyzer};
pub use claim::{VerificationClaim, UNKNOWN};
pub use detector::{evaluate, Decision, PurchaseTerms, Rejection};
pub use error::{ConflictKind, LedgerError, ReasonCode};
pub use history::{NewTransaction, TransactionHistory, TransactionRecord, PLACEHOLDER_PREFIX};
pub use ledger::{AdminActor, AdminLedger, CreditLedger, Grant};
pub use plans::{Plan, PlanCatalog};
pub use tracking::{PixelSettings, PurchaseTracker};
pub use verifier::{ReceiptVerifier, VerificationRequest, VerificationResponse, Verdict};
