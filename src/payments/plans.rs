//! Credit Plan Catalog
//!
//! Plans supply the expected receipt amount and the credits granted on
//! acceptance. Defaults are seeded on first open and can be edited by admins.

use crate::db::Database;
use anyhow::{bail, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    /// PKR
    pub price: i64,
    pub credits: i64,
}

impl Plan {
    fn new(id: &str, name: &str, price: i64, credits: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            price,
            credits,
        }
    }
}

pub fn default_plans() -> Vec<Plan> {
    vec![
        Plan::new("basic", "Basic", 299, 5),
        Plan::new("standard", "Standard", 699, 12),
        Plan::new("pro", "Pro", 1499, 30),
    ]
}

fn row_to_plan(row: &Row<'_>) -> rusqlite::Result<Plan> {
    Ok(Plan {
        id: row.get(0)?,
        name: row.get(1)?,
        price: row.get(2)?,
        credits: row.get(3)?,
    })
}

#[derive(Clone)]
pub struct PlanCatalog {
    db: Database,
}

impl PlanCatalog {
    /// Open the catalog, seeding the default plans if the table is empty
    pub async fn open(db: Database) -> Result<Self> {
        {
            let conn = db.lock().await;
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM plans", [], |row| row.get(0))?;
            if count == 0 {
                for (order, plan) in default_plans().iter().enumerate() {
                    conn.execute(
                        "INSERT INTO plans (id, name, price, credits, sort_order) VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![&plan.id, &plan.name, plan.price, plan.credits, order as i64],
                    )?;
                }
                info!("📦 Seeded {} default plans", default_plans().len());
            }
        }
        Ok(Self { db })
    }

    pub async fn list(&self) -> Result<Vec<Plan>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, price, credits FROM plans ORDER BY sort_order ASC, id ASC",
        )?;
        let plans = stmt
            .query_map([], row_to_plan)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    pub async fn get(&self, plan_id: &str) -> Result<Option<Plan>> {
        let conn = self.db.lock().await;
        let mut stmt =
            conn.prepare_cached("SELECT id, name, price, credits FROM plans WHERE id = ?1")?;
        Ok(stmt.query_row(params![plan_id], row_to_plan).optional()?)
    }

    /// Change a plan's price and credit amount (admin pricing editor)
    pub async fn update(&self, plan_id: &str, price: i64, credits: i64) -> Result<Option<Plan>> {
        if price <= 0 || credits <= 0 {
            bail!("price and credits must be positive");
        }
        let conn = self.db.lock().await;
        let changed = conn.execute(
            "UPDATE plans SET price = ?1, credits = ?2 WHERE id = ?3",
            params![price, credits, plan_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        info!(plan_id, price, credits, "Plan updated");

        let mut stmt =
            conn.prepare_cached("SELECT id, name, price, credits FROM plans WHERE id = ?1")?;
        Ok(stmt.query_row(params![plan_id], row_to_plan).optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    async fn create_test_catalog() -> (PlanCatalog, Database, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::open(temp.path().to_str().unwrap()).unwrap();
        (PlanCatalog::open(db.clone()).await.unwrap(), db, temp)
    }

    #[tokio::test]
    async fn test_defaults_seeded_once() {
        let (catalog, db, _temp) = create_test_catalog().await;
        let plans = catalog.list().await.unwrap();
        assert_eq!(plans, default_plans());

        // Reopening keeps edits instead of reseeding
        catalog.update("pro", 1599, 32).await.unwrap();
        let reopened = PlanCatalog::open(db).await.unwrap();
        assert_eq!(reopened.get("pro").await.unwrap().unwrap().price, 1599);
        assert_eq!(reopened.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_standard_plan_terms() {
        let (catalog, _db, _temp) = create_test_catalog().await;
        let standard = catalog.get("standard").await.unwrap().unwrap();
        assert_eq!(standard.price, 699);
        assert_eq!(standard.credits, 12);
        assert!(catalog.get("platinum").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_validates_and_reports_missing() {
        let (catalog, _db, _temp) = create_test_catalog().await;
        assert!(catalog.update("basic", 0, 5).await.is_err());
        assert!(catalog.update("basic", 299, -1).await.is_err());
        assert!(catalog.update("missing", 100, 1).await.unwrap().is_none());

        let updated = catalog.update("basic", 349, 6).await.unwrap().unwrap();
        assert_eq!((updated.price, updated.credits), (349, 6));
    }
}
