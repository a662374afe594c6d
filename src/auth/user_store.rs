//! User Storage
//!
//! Accounts live in their own SQLite file; each call opens a short-lived
//! connection.

use crate::auth::models::{normalize_email, User, UserRole};
use crate::db::parse_uuid;
use anyhow::{bail, Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, full_name, country, password_hash, role, created_at";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(5)?;
    Ok(User {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        country: row.get(3)?,
        password_hash: row.get(4)?,
        role: UserRole::from_str(&role_str).unwrap_or(UserRole::Member),
        created_at: row.get(6)?,
    })
}

pub struct UserStore {
    db_path: String,
    hash_cost: u32,
}

impl UserStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
            hash_cost: DEFAULT_COST,
        };
        store.init_db()?;
        Ok(store)
    }

    /// Lower bcrypt cost (tests and tooling only)
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path).context("open auth db")
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.open()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                full_name TEXT NOT NULL,
                country TEXT NOT NULL DEFAULT '',
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Create the bootstrap admin when no admin account exists yet.
    /// Returns the new admin, or `None` if one already existed.
    pub fn ensure_admin(&self, email: Option<&str>, password: Option<&str>) -> Result<Option<User>> {
        let conn = self.open()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users WHERE role = 'admin'", [], |row| {
                row.get(0)
            })
            .context("Failed to check for admin users")?;
        if count > 0 {
            return Ok(None);
        }

        let (Some(email), Some(password)) = (email, password) else {
            warn!("⚠️  No admin account exists; set ADMIN_EMAIL and ADMIN_PASSWORD to create one");
            return Ok(None);
        };

        let admin = self.create_user(email, password, "Administrator", "", UserRole::Admin)?;
        info!("🔐 Bootstrap admin created: {}", admin.email);
        Ok(Some(admin))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"))?;
        let user = stmt
            .query_row(params![normalize_email(email)], row_to_user)
            .optional()?;
        Ok(user)
    }

    pub fn get_user(&self, user_id: &Uuid) -> Result<Option<User>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;
        let user = stmt
            .query_row(params![user_id.to_string()], row_to_user)
            .optional()?;
        Ok(user)
    }

    /// The user, if the password matches
    pub fn verify_password(&self, email: &str, password: &str) -> Result<Option<User>> {
        match self.get_user_by_email(email)? {
            Some(user) => {
                let valid =
                    verify(password, &user.password_hash).context("Failed to verify password")?;
                Ok(valid.then_some(user))
            }
            None => Ok(None),
        }
    }

    pub fn create_user(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        country: &str,
        role: UserRole,
    ) -> Result<User> {
        let email = normalize_email(email);
        if self.get_user_by_email(&email)?.is_some() {
            bail!("User already exists: {email}");
        }

        let password_hash = hash(password, self.hash_cost).context("Failed to hash password")?;

        let user = User {
            id: Uuid::new_v4(),
            email,
            full_name: full_name.trim().to_string(),
            country: country.trim().to_string(),
            password_hash,
            role,
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = self.open()?;
        conn.execute(
            "INSERT INTO users (id, email, full_name, country, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id.to_string(),
                user.email,
                user.full_name,
                user.country,
                user.password_hash,
                user.role.as_str(),
                user.created_at,
            ],
        )
        .context("Failed to insert user")?;

        info!("✅ Created user: {} ({})", user.email, user.role.as_str());

        Ok(user)
    }

    /// All users, oldest first
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
        ))?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (UserStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = UserStore::new(db_path).unwrap().with_hash_cost(4);
        (store, temp_file)
    }

    #[test]
    fn test_bootstrap_admin_created_once() {
        let (store, _temp) = create_test_store();

        assert!(store.ensure_admin(None, None).unwrap().is_none());
        assert!(store.list_users().unwrap().is_empty());

        let admin = store
            .ensure_admin(Some("Admin@SelfiePro.com"), Some("admin-password"))
            .unwrap()
            .unwrap();
        assert_eq!(admin.email, "admin@selfiepro.com");
        assert_eq!(admin.role, UserRole::Admin);

        assert!(store
            .ensure_admin(Some("other@selfiepro.com"), Some("x"))
            .unwrap()
            .is_none());
        assert_eq!(store.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_password_verification() {
        let (store, _temp) = create_test_store();
        store
            .create_user("sana@example.com", "password123", "Sana", "Pakistan", UserRole::Member)
            .unwrap();

        assert!(store
            .verify_password("SANA@example.com", "password123")
            .unwrap()
            .is_some());
        assert!(store
            .verify_password("sana@example.com", "wrongpassword")
            .unwrap()
            .is_none());
        assert!(store
            .verify_password("nobody@example.com", "password123")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_create_and_retrieve_user() {
        let (store, _temp) = create_test_store();
        let user = store
            .create_user(" ali@example.com ", "password123", "Ali Khan", "Pakistan", UserRole::Member)
            .unwrap();

        let by_id = store.get_user(&user.id).unwrap().unwrap();
        assert_eq!(by_id.email, "ali@example.com");
        assert_eq!(by_id.full_name, "Ali Khan");
        assert_eq!(by_id.role, UserRole::Member);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let (store, _temp) = create_test_store();
        store
            .create_user("ali@example.com", "password123", "Ali", "", UserRole::Member)
            .unwrap();
        assert!(store
            .create_user("ALI@example.com", "password456", "Ali 2", "", UserRole::Member)
            .is_err());
    }
}
