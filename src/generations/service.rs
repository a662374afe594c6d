//! Paid selfie generation
//!
//! One credit per image. The balance is checked before the (slow) compose
//! call and the debit happens only after an image exists, in the same
//! transaction as the gallery row.

use crate::generations::composer::{ComposeRequest, ImageComposer};
use crate::generations::store::{GenerationRecord, GenerationStore};
use crate::payments::{CreditLedger, LedgerError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CREDITS_PER_GENERATION: i64 = 1;

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub record: GenerationRecord,
    pub mime_type: String,
    pub image: Vec<u8>,
    pub balance: i64,
}

#[derive(Debug)]
pub enum GenerationError {
    InsufficientCredits { available: i64 },
    ComposeFailed(anyhow::Error),
    Storage(anyhow::Error),
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationError::InsufficientCredits { available } => {
                write!(f, "Insufficient credits (balance {available})")
            }
            GenerationError::ComposeFailed(e) => write!(f, "Image generation failed: {e:#}"),
            GenerationError::Storage(e) => write!(f, "Storage failure: {e:#}"),
        }
    }
}

impl std::error::Error for GenerationError {}

impl From<LedgerError> for GenerationError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientCredits { available, .. } => {
                GenerationError::InsufficientCredits { available }
            }
            other => GenerationError::Storage(anyhow::Error::new(other)),
        }
    }
}

#[derive(Clone)]
pub struct SelfieService {
    composer: Arc<dyn ImageComposer>,
    ledger: CreditLedger,
    store: GenerationStore,
    compose_timeout: Duration,
}

impl SelfieService {
    pub fn new(
        composer: Arc<dyn ImageComposer>,
        ledger: CreditLedger,
        store: GenerationStore,
        compose_timeout: Duration,
    ) -> Self {
        Self {
            composer,
            ledger,
            store,
            compose_timeout,
        }
    }

    pub fn store(&self) -> &GenerationStore {
        &self.store
    }

    pub async fn generate(
        &self,
        user_id: Uuid,
        request: ComposeRequest,
    ) -> Result<GenerationOutcome, GenerationError> {
        let available = self.ledger.balance(user_id).await?;
        if available < CREDITS_PER_GENERATION {
            return Err(GenerationError::InsufficientCredits { available });
        }

        let composed = match tokio::time::timeout(
            self.compose_timeout,
            self.composer.compose(&request),
        )
        .await
        {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => return Err(GenerationError::ComposeFailed(e)),
            Err(_) => {
                return Err(GenerationError::ComposeFailed(anyhow::anyhow!(
                    "timed out after {}s",
                    self.compose_timeout.as_secs()
                )))
            }
        };

        let id = Uuid::new_v4();
        let record = GenerationRecord {
            id,
            user_id,
            template: request.template.label().to_string(),
            image_path: self.store.image_path(id, composed.file_extension()),
            created_at: Utc::now(),
        };

        tokio::fs::write(&record.image_path, &composed.bytes)
            .await
            .map_err(|e| GenerationError::Storage(e.into()))?;

        let spent = self
            .ledger
            .spend(user_id, CREDITS_PER_GENERATION, |conn| {
                GenerationStore::insert(conn, &record)
            })
            .await;

        let balance = match spent {
            Ok((balance, ())) => balance,
            Err(e) => {
                // Drained by a concurrent spend or storage failure: the image is discarded
                if let Err(io) = tokio::fs::remove_file(&record.image_path).await {
                    warn!(path = %record.image_path.display(), "cleanup failed: {}", io);
                }
                return Err(e.into());
            }
        };

        info!(
            user_id = %user_id,
            generation_id = %record.id,
            template = %record.template,
            balance,
            "📸 Selfie generated"
        );

        Ok(GenerationOutcome {
            record,
            mime_type: composed.mime_type,
            image: composed.bytes,
            balance,
        })
    }
}

/// Periodically delete gallery entries older than `retention`. Errors are
/// logged and the loop keeps going.
pub async fn retention_sweep_polling(store: GenerationStore, retention: Duration, every: Duration) {
    let retention_hours = retention.as_secs() / 3600;
    info!("🧹 Generation retention sweep every {}s (retention={}h)", every.as_secs(), retention_hours);

    let mut ticker = interval(every);
    loop {
        ticker.tick().await;
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            error!("retention window out of range, sweep disabled");
            return;
        };
        let cutoff = Utc::now() - retention;

        match store.prune_before(cutoff).await {
            Ok(report) => {
                if report.rows > 0 {
                    info!(
                        "🧹 Pruned {} generations ({} files, retention={}h)",
                        report.rows, report.files, retention_hours
                    );
                }
            }
            Err(e) => warn!("generation prune failed: {}", e),
        }
    }
}
