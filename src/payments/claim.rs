//! Verification Claims
//!
//! A claim is what the vision model says it saw on a receipt. It is never
//! trusted on its own: the detector always cross-checks it against history.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Reserved value the vision model returns for fields it could not read
pub const UNKNOWN: &str = "UNKNOWN";

/// Normalise a raw extracted field: blanks and the sentinel become `None`.
pub fn known_field(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(UNKNOWN) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Structured output of the receipt analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationClaim {
    /// Visible amount lies within `[expected - tolerance, expected + tolerance]`
    pub amount_verified: bool,
    /// 0..=100
    pub confidence: u8,
    pub reason: String,
    #[serde(with = "sentinel")]
    pub transaction_id: Option<String>,
    #[serde(with = "sentinel")]
    pub sender_name: Option<String>,
    /// Receipt-displayed date/time, compared only for exact equality
    #[serde(with = "sentinel")]
    pub timestamp_text: Option<String>,
    pub is_edited: bool,
}

impl VerificationClaim {
    /// Both halves of the (sender, timestamp) fingerprint, when known
    pub fn metadata_fingerprint(&self) -> Option<(&str, &str)> {
        match (self.sender_name.as_deref(), self.timestamp_text.as_deref()) {
            (Some(sender), Some(ts)) => Some((sender, ts)),
            _ => None,
        }
    }
}

/// Serde adapter mapping `Option<String>` to the `"UNKNOWN"` sentinel on the wire
pub mod sentinel {
    use super::*;

    pub fn serialize<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value.as_deref().unwrap_or(UNKNOWN))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(known_field))
    }
}
