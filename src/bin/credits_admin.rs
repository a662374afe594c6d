//! Credits admin tool
//!
//! Operator CLI for support corrections against the credits database.
//!
//! Usage:
//!   cargo run --bin selfiepro-admin -- balance --user someone@example.com
//!   cargo run --bin selfiepro-admin -- set-balance --user someone@example.com --credits 12 --operator alice
//!   cargo run --bin selfiepro-admin -- transactions --limit 20
//!   cargo run --bin selfiepro-admin -- prune-generations --older-than-hours 24

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use selfiepro_backend::{
    auth::UserStore,
    config::{load_env, resolve_data_path},
    db::Database,
    generations::GenerationStore,
    payments::{AdminActor, AdminLedger, CreditLedger, TransactionHistory},
};

#[derive(Parser, Debug)]
#[command(name = "selfiepro-admin")]
#[command(about = "Inspect and correct SelfiePro credit balances")]
struct Cli {
    /// Credits database (defaults to CREDITS_DB_PATH)
    #[arg(long, env = "CREDITS_DB_PATH")]
    credits_db: Option<String>,

    /// Auth database, used to resolve emails (defaults to AUTH_DB_PATH)
    #[arg(long, env = "AUTH_DB_PATH")]
    auth_db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show one user's balance, or every balance when no user is given
    Balance {
        /// User email or UUID
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Overwrite a user's balance
    SetBalance {
        /// User email or UUID
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        credits: i64,

        /// Name recorded in the audit log
        #[arg(short, long, env = "USER")]
        operator: String,
    },

    /// List accepted receipts, newest first
    Transactions {
        /// Only this user's receipts (email or UUID)
        #[arg(short, long)]
        user: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Delete gallery entries older than the given age
    PruneGenerations {
        #[arg(long, default_value = "24")]
        older_than_hours: i64,

        /// Image directory (defaults to GENERATIONS_DIR)
        #[arg(long, env = "GENERATIONS_DIR")]
        dir: Option<String>,
    },
}

fn resolve_user(users: &UserStore, raw: &str) -> Result<Uuid> {
    if let Ok(id) = Uuid::parse_str(raw) {
        return Ok(id);
    }
    users
        .get_user_by_email(raw)?
        .map(|u| u.id)
        .ok_or_else(|| anyhow!("no user with email {raw}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "selfiepro_backend=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let credits_db = resolve_data_path(cli.credits_db, "selfiepro_credits.db");
    let auth_db = resolve_data_path(cli.auth_db, "selfiepro_auth.db");

    let db = Database::open(&credits_db)
        .with_context(|| format!("open credits database {credits_db}"))?;
    let users = UserStore::new(&auth_db)?;

    match cli.command {
        Commands::Balance { user: Some(user) } => {
            let id = resolve_user(&users, &user)?;
            let credits = CreditLedger::new(db).balance(id).await?;
            println!("{id}\t{credits}");
        }
        Commands::Balance { user: None } => {
            for (id, credits) in AdminLedger::new(db).list_balances().await? {
                let email = users
                    .get_user(&id)?
                    .map(|u| u.email)
                    .unwrap_or_else(|| "-".to_string());
                println!("{id}\t{email}\t{credits}");
            }
        }
        Commands::SetBalance {
            user,
            credits,
            operator,
        } => {
            let id = resolve_user(&users, &user)?;
            let actor = AdminActor::local_operator(&operator);
            let stored = AdminLedger::new(db).set_balance(&actor, id, credits).await?;
            println!("{id}\t{stored}");
        }
        Commands::Transactions { user, limit } => {
            let history = TransactionHistory::new(db);
            let rows = match user {
                Some(user) => {
                    let id = resolve_user(&users, &user)?;
                    history.list_for_user(id, limit).await?
                }
                None => history.list_all(limit).await?,
            };
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::PruneGenerations {
            older_than_hours,
            dir,
        } => {
            let dir = resolve_data_path(dir, "generated_images");
            let store = GenerationStore::new(db, dir)?;
            let cutoff = Utc::now() - chrono::Duration::hours(older_than_hours.max(0));
            let report = store.prune_before(cutoff).await?;
            println!("pruned {} rows, {} files", report.rows, report.files);
        }
    }

    Ok(())
}
