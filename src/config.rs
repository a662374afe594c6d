//! Application Configuration
//!
//! Everything is read from the environment (after `.env` loading) with
//! defaults suitable for local development.

use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration shared by the server and the admin CLI
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub auth_db_path: String,
    pub credits_db_path: String,
    pub generations_dir: PathBuf,
    pub jwt_secret: String,

    // Gemini
    pub gemini_api_key: Option<String>,
    pub gemini_vision_model: String,
    pub gemini_image_model: String,
    pub analysis_timeout: Duration,
    pub compose_timeout: Duration,

    /// Accepted deviation (PKR) between plan price and the receipt amount
    pub receipt_tolerance: i64,
    pub max_upload_bytes: usize,
    pub verify_rate_limit_per_min: u32,
    /// Read client IPs from `X-Forwarded-For` (only behind a trusted proxy)
    pub trust_forwarded_for: bool,

    // Generation gallery retention
    pub generation_retention: Duration,
    pub retention_sweep_interval: Duration,

    // Bootstrap admin
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,

    // Purchase tracking
    pub facebook_pixel_id: Option<String>,
    pub tiktok_pixel_id: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let auth_db_path = resolve_data_path(env::var("AUTH_DB_PATH").ok(), "selfiepro_auth.db");
        let credits_db_path =
            resolve_data_path(env::var("CREDITS_DB_PATH").ok(), "selfiepro_credits.db");
        let generations_dir = PathBuf::from(resolve_data_path(
            env::var("GENERATIONS_DIR").ok(),
            "generated_images",
        ));

        let jwt_secret = env::var("JWT_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-in-production-minimum-32-characters".to_string());

        let gemini_api_key = non_empty_var("GEMINI_API_KEY").or_else(|| non_empty_var("API_KEY"));
        let gemini_vision_model =
            non_empty_var("GEMINI_VISION_MODEL").unwrap_or_else(|| "gemini-2.5-flash".to_string());
        let gemini_image_model = non_empty_var("GEMINI_IMAGE_MODEL")
            .unwrap_or_else(|| "gemini-3-pro-image-preview".to_string());

        let analysis_timeout = Duration::from_secs(parse_var("ANALYSIS_TIMEOUT_SECS", 45u64)?);
        let compose_timeout = Duration::from_secs(parse_var("COMPOSE_TIMEOUT_SECS", 120u64)?);

        let receipt_tolerance = parse_var("RECEIPT_TOLERANCE", 100i64)?;
        if receipt_tolerance < 0 {
            anyhow::bail!("RECEIPT_TOLERANCE must not be negative");
        }

        let max_upload_bytes = parse_var("MAX_UPLOAD_BYTES", 20 * 1024 * 1024usize)?;
        let verify_rate_limit_per_min = parse_var("VERIFY_RATE_LIMIT_PER_MIN", 10u32)?;
        let trust_forwarded_for = parse_var("TRUST_FORWARDED_FOR", false)?;

        let retention_hours = parse_var("GENERATION_RETENTION_HOURS", 24u64)?.max(1);
        let sweep_secs = parse_var("RETENTION_SWEEP_SECS", 900u64)?.max(1);

        Ok(Self {
            bind_addr,
            auth_db_path,
            credits_db_path,
            generations_dir,
            jwt_secret,
            gemini_api_key,
            gemini_vision_model,
            gemini_image_model,
            analysis_timeout,
            compose_timeout,
            receipt_tolerance,
            max_upload_bytes,
            verify_rate_limit_per_min,
            trust_forwarded_for,
            generation_retention: Duration::from_secs(retention_hours * 3600),
            retention_sweep_interval: Duration::from_secs(sweep_secs),
            admin_email: non_empty_var("ADMIN_EMAIL"),
            admin_password: non_empty_var("ADMIN_PASSWORD"),
            facebook_pixel_id: non_empty_var("FACEBOOK_PIXEL_ID"),
            tiktok_pixel_id: non_empty_var("TIKTOK_PIXEL_ID"),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid {key}: {raw}")),
        None => Ok(default),
    }
}

fn default_data_path(filename: &str) -> String {
    // Anchor defaults to the crate directory
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    base.join(filename).to_string_lossy().to_string()
}

/// Resolve a data file path; relative paths are taken against the crate
/// directory, not the caller's cwd.
pub fn resolve_data_path(env_value: Option<String>, default_filename: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) else {
        return default_data_path(default_filename);
    };

    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }

    base.join(p).to_string_lossy().to_string()
}

/// Load `.env` from the cwd search path and from the crate directory.
pub fn load_env() {
    let _ = dotenv::dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidates = [manifest_dir.join(".env"), manifest_dir.join("../.env")];

    for p in candidates {
        if p.exists() {
            let _ = dotenv::from_path(&p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths_anchor_to_manifest_dir() {
        let resolved = resolve_data_path(Some("data/credits.db".to_string()), "x.db");
        assert!(resolved.starts_with(env!("CARGO_MANIFEST_DIR")));
        assert!(resolved.ends_with("credits.db"));
    }

    #[test]
    fn test_absolute_paths_kept() {
        let resolved = resolve_data_path(Some("/var/lib/selfiepro/c.db".to_string()), "x.db");
        assert_eq!(resolved, "/var/lib/selfiepro/c.db");
    }

    #[test]
    fn test_blank_env_falls_back_to_default() {
        let resolved = resolve_data_path(Some("   ".to_string()), "default.db");
        assert!(resolved.ends_with("default.db"));
    }
}
