//! Generation gallery storage
//!
//! Image files live under one directory; rows in the shared database point
//! at them.

use crate::db::{millis_to_utc, parse_uuid, Database};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub template: String,
    #[serde(skip_serializing)]
    pub image_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub rows: usize,
    pub files: usize,
}

fn row_to_generation(row: &Row<'_>) -> rusqlite::Result<GenerationRecord> {
    Ok(GenerationRecord {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        user_id: parse_uuid(1, &row.get::<_, String>(1)?)?,
        template: row.get(2)?,
        image_path: PathBuf::from(row.get::<_, String>(3)?),
        created_at: millis_to_utc(4, row.get(4)?)?,
    })
}

#[derive(Clone)]
pub struct GenerationStore {
    db: Database,
    dir: PathBuf,
}

impl GenerationStore {
    pub fn new(db: Database, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create generations dir {}", dir.display()))?;
        Ok(Self { db, dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn image_path(&self, id: Uuid, extension: &str) -> PathBuf {
        self.dir.join(format!("{id}.{extension}"))
    }

    /// Insert a row on an open connection/transaction
    pub(crate) fn insert(conn: &Connection, record: &GenerationRecord) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO generations (id, user_id, template, image_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.to_string(),
                record.user_id.to_string(),
                &record.template,
                record.image_path.to_string_lossy(),
                record.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<GenerationRecord>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, user_id, template, image_path, created_at FROM generations WHERE id = ?1",
        )?;
        Ok(stmt
            .query_row(params![id.to_string()], row_to_generation)
            .optional()?)
    }

    /// A user's gallery, newest first
    pub async fn list_for_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<GenerationRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = limit.min(500) as i64;
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, user_id, template, image_path, created_at FROM generations
             WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id.to_string(), limit], row_to_generation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete rows created before `cutoff` and their image files. Missing
    /// files are not an error.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<PruneReport> {
        let expired = {
            let conn = self.db.lock().await;
            let mut stmt = conn.prepare_cached(
                "SELECT id, user_id, template, image_path, created_at FROM generations
                 WHERE created_at < ?1",
            )?;
            let rows = stmt
                .query_map(params![cutoff.timestamp_millis()], row_to_generation)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut report = PruneReport::default();
        for record in &expired {
            match tokio::fs::remove_file(&record.image_path).await {
                Ok(()) => report.files += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(id = %record.id, "generation file already gone");
                }
                Err(e) => warn!(id = %record.id, path = %record.image_path.display(), "remove failed: {}", e),
            }
        }

        let conn = self.db.lock().await;
        report.rows = conn.execute(
            "DELETE FROM generations WHERE created_at < ?1",
            params![cutoff.timestamp_millis()],
        )?;

        Ok(report)
    }
}
