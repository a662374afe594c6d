//! SelfiePro - AI group selfies paid for with verified JazzCash/EasyPaisa receipts

use anyhow::{Context, Result};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::interval};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use selfiepro_backend::{
    api::{build_router, AppState},
    auth::{AuthState, JwtHandler, UserStore},
    config::{load_env, AppConfig},
    db::Database,
    gemini::GeminiClient,
    generations::{
        retention_sweep_polling, DisabledComposer, GeminiImageComposer, GenerationStore,
        ImageComposer, SelfieService,
    },
    middleware::{RateLimitConfig, RateLimitLayer},
    payments::{
        AdminLedger, CreditLedger, DisabledAnalyzer, GeminiReceiptAnalyzer, PlanCatalog,
        PurchaseTracker, ReceiptAnalyzer, ReceiptVerifier, TransactionHistory,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = AppConfig::from_env()?;
    info!("🚀 SelfiePro backend starting");

    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    // Auth
    let user_store = Arc::new(UserStore::new(&config.auth_db_path)?);
    user_store.ensure_admin(
        config.admin_email.as_deref(),
        config.admin_password.as_deref(),
    )?;
    let jwt_handler = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
    info!("🔐 Authentication initialized at: {}", config.auth_db_path);

    // Credits
    let db = Database::open(&config.credits_db_path)?;
    let plans = PlanCatalog::open(db.clone()).await?;
    let ledger = CreditLedger::new(db.clone());
    let history = TransactionHistory::new(db.clone());
    let admin_ledger = AdminLedger::new(db.clone());
    let tracker = Arc::new(PurchaseTracker::new(
        config.facebook_pixel_id.clone(),
        config.tiktok_pixel_id.clone(),
    ));
    info!("💳 Credit ledger initialized at: {}", config.credits_db_path);

    let (analyzer, composer): (Arc<dyn ReceiptAnalyzer>, Arc<dyn ImageComposer>) =
        match config.gemini_api_key.clone() {
            Some(key) => {
                let client = GeminiClient::new(http_client.clone(), key)?;
                (
                    Arc::new(GeminiReceiptAnalyzer::new(
                        client.clone(),
                        config.gemini_vision_model.clone(),
                        config.analysis_timeout,
                    )),
                    Arc::new(GeminiImageComposer::new(
                        client,
                        config.gemini_image_model.clone(),
                        config.compose_timeout,
                    )),
                )
            }
            None => {
                warn!("GEMINI_API_KEY not set; receipt verification and generation are unavailable");
                (Arc::new(DisabledAnalyzer), Arc::new(DisabledComposer))
            }
        };

    let verifier = ReceiptVerifier::new(
        analyzer,
        history.clone(),
        ledger.clone(),
        tracker.clone(),
        config.analysis_timeout,
    );

    let generation_store = GenerationStore::new(db.clone(), config.generations_dir.clone())?;
    let selfies = SelfieService::new(
        composer,
        ledger.clone(),
        generation_store.clone(),
        config.compose_timeout,
    );

    // Background maintenance
    tokio::spawn(retention_sweep_polling(
        generation_store,
        config.generation_retention,
        config.retention_sweep_interval,
    ));

    let verify_limiter =
        RateLimitLayer::new(
            RateLimitConfig::per_minute(config.verify_rate_limit_per_min)
                .with_trusted_proxy(config.trust_forwarded_for),
        );
    tokio::spawn(rate_limit_cleanup_polling(verify_limiter.clone()));

    let auth_state = AuthState::new(user_store.clone(), jwt_handler, ledger.clone());
    let app_state = AppState {
        plans,
        ledger,
        admin_ledger,
        history,
        verifier,
        selfies,
        tracker,
        user_store,
        receipt_tolerance: config.receipt_tolerance,
    };

    let app = build_router(app_state, auth_state, verify_limiter, config.max_upload_bytes);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("🎯 API server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

async fn rate_limit_cleanup_polling(limiter: RateLimitLayer) {
    let mut ticker = interval(Duration::from_secs(300));
    loop {
        ticker.tick().await;
        limiter.cleanup();
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "selfiepro_backend=debug,selfiepro=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
