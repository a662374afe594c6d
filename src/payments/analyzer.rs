//! Receipt Vision Adapter
//!
//! Turns a receipt screenshot into a `VerificationClaim`. Suspicious receipts
//! are still a successful extraction (the claim carries the signal); `Err`
//! is reserved for transport and decoding failures.

use crate::gemini::{GeminiClient, RequestPart};
use crate::payments::claim::{known_field, VerificationClaim};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

#[async_trait]
pub trait ReceiptAnalyzer: Send + Sync {
    async fn extract(
        &self,
        image: &[u8],
        mime_type: &str,
        expected_amount: i64,
        tolerance: i64,
    ) -> Result<VerificationClaim>;
}

/// Raw JSON shape returned by the vision model
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClaim {
    verified: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    transaction_id: String,
    #[serde(default)]
    sender_name: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    is_edited: bool,
}

impl From<RawClaim> for VerificationClaim {
    fn from(raw: RawClaim) -> Self {
        let confidence = if raw.confidence.is_finite() {
            raw.confidence.round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        VerificationClaim {
            amount_verified: raw.verified,
            confidence,
            reason: raw.reason.trim().to_string(),
            transaction_id: known_field(&raw.transaction_id),
            sender_name: known_field(&raw.sender_name),
            timestamp_text: known_field(&raw.timestamp),
            is_edited: raw.is_edited,
        }
    }
}

/// Parse the model's JSON text into a claim. Tolerates a fenced code block.
pub fn parse_claim(text: &str) -> Result<VerificationClaim> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    let raw: RawClaim = serde_json::from_str(body).context("receipt analysis json")?;
    Ok(raw.into())
}

fn receipt_prompt(expected_amount: i64, tolerance: i64) -> String {
    format!(
        "Examine this payment receipt screenshot (JazzCash, Easypaisa, Nayapay or bank app) \
         for a payment of about {expected_amount} PKR.\n\
         - verified: true only if the amount is between {min} and {max} and the receipt looks authentic.\n\
         - confidence: 0-100.\n\
         - reason: short explanation.\n\
         - transactionId, senderName, timestamp: exactly as shown, or \"UNKNOWN\".\n\
         - isEdited: true on any sign of digital manipulation, font mismatch or patching around the ID.",
        min = expected_amount - tolerance,
        max = expected_amount + tolerance,
    )
}

fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "verified": { "type": "BOOLEAN" },
            "confidence": { "type": "INTEGER" },
            "reason": { "type": "STRING" },
            "transactionId": { "type": "STRING" },
            "senderName": { "type": "STRING" },
            "timestamp": { "type": "STRING" },
            "isEdited": { "type": "BOOLEAN" }
        },
        "required": ["verified", "confidence", "reason", "transactionId", "senderName", "timestamp", "isEdited"]
    })
}

pub struct GeminiReceiptAnalyzer {
    client: GeminiClient,
    model: String,
    timeout: Duration,
}

impl GeminiReceiptAnalyzer {
    pub fn new(client: GeminiClient, model: String, timeout: Duration) -> Self {
        Self {
            client,
            model,
            timeout,
        }
    }
}

#[async_trait]
impl ReceiptAnalyzer for GeminiReceiptAnalyzer {
    async fn extract(
        &self,
        image: &[u8],
        mime_type: &str,
        expected_amount: i64,
        tolerance: i64,
    ) -> Result<VerificationClaim> {
        let parts = vec![
            RequestPart::text(receipt_prompt(expected_amount, tolerance)),
            RequestPart::image(mime_type, BASE64.encode(image)),
        ];
        let config = json!({
            "responseMimeType": "application/json",
            "responseSchema": response_schema(),
        });

        let out = self
            .client
            .generate_content(&self.model, parts, config, self.timeout)
            .await?;
        let text = out
            .texts
            .first()
            .ok_or_else(|| anyhow!("empty response from vision model"))?;
        let claim = parse_claim(text)?;

        info!(
            model = %out.model,
            latency_ms = out.latency_ms,
            verified = claim.amount_verified,
            confidence = claim.confidence,
            is_edited = claim.is_edited,
            tx_id = claim.transaction_id.as_deref().unwrap_or("UNKNOWN"),
            "🧾 Receipt analyzed"
        );
        Ok(claim)
    }
}

/// Stand-in used when no vision API key is configured; every receipt
/// comes back as a transport failure.
pub struct DisabledAnalyzer;

#[async_trait]
impl ReceiptAnalyzer for DisabledAnalyzer {
    async fn extract(&self, _: &[u8], _: &str, _: i64, _: i64) -> Result<VerificationClaim> {
        Err(anyhow!("GEMINI_API_KEY not configured"))
    }
}
