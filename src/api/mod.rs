//! HTTP API
//!
//! # Endpoints
//!
//! Public:
//! - `GET /health`
//! - `GET /api/plans` - credit plans
//! - `GET /api/templates` - selfie scene templates
//! - `POST /api/auth/signup`, `POST /api/auth/login`
//!
//! Authenticated:
//! - `GET /api/auth/me`
//! - `GET /api/credits` - caller's balance
//! - `POST /api/payments/verify` - receipt upload (rate limited)
//! - `GET /api/payments/transactions` - caller's accepted receipts
//! - `POST /api/generations`, `GET /api/generations`, `GET /api/generations/:id/image`
//!
//! Admin:
//! - `GET /api/admin/users`, `GET /api/admin/transactions`
//! - `PUT /api/admin/users/:id/credits`, `PUT /api/admin/plans/:id`
//! - `GET /api/admin/tracking`, `PUT /api/admin/tracking` - ad pixel IDs

pub mod admin;
pub mod generations;
pub mod payments;

use crate::auth::{api as auth_api, auth_middleware, models::Claims, AuthState, UserStore};
use crate::generations::SelfieService;
use crate::middleware::{rate_limit_middleware, request_logging, RateLimitLayer};
use crate::payments::{
    AdminLedger, CreditLedger, PlanCatalog, PurchaseTracker, ReceiptVerifier, TransactionHistory,
};
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub plans: PlanCatalog,
    pub ledger: CreditLedger,
    pub admin_ledger: AdminLedger,
    pub history: TransactionHistory,
    pub verifier: ReceiptVerifier,
    pub selfies: SelfieService,
    pub tracker: Arc<PurchaseTracker>,
    pub user_store: Arc<UserStore>,
    /// Accepted receipt deviation (PKR) around the plan price
    pub receipt_tolerance: i64,
}

/// Errors surfaced by the API handlers
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(&'static str),
    InsufficientCredits { available: i64 },
    Upstream(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<crate::payments::LedgerError> for ApiError {
    fn from(e: crate::payments::LedgerError) -> Self {
        match e {
            crate::payments::LedgerError::InsufficientCredits { available, .. } => {
                ApiError::InsufficientCredits { available }
            }
            crate::payments::LedgerError::InvalidAmount(n) => {
                ApiError::BadRequest(format!("Invalid credit amount: {n}"))
            }
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "Authentication required" }),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                json!({ "error": "Insufficient permissions" }),
            ),
            ApiError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                json!({ "error": format!("{what} not found") }),
            ),
            ApiError::InsufficientCredits { available } => (
                StatusCode::PAYMENT_REQUIRED,
                json!({
                    "error": "Insufficient credits. Please buy a credit plan.",
                    "reasonCode": "INSUFFICIENT_CREDITS",
                    "balance": available,
                }),
            ),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, json!({ "error": msg })),
            ApiError::Internal(e) => {
                error!("internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

pub(crate) fn caller_id(claims: &Claims) -> Result<Uuid, ApiError> {
    claims.user_id().ok_or(ApiError::Unauthorized)
}

/// Decode a base64 image, accepting an optional `data:<mime>;base64,` prefix
pub(crate) fn decode_image(data: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let bytes = BASE64
        .decode(payload.trim().as_bytes())
        .map_err(|_| ApiError::BadRequest("Image is not valid base64".to_string()))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Image is empty".to_string()));
    }
    Ok(bytes)
}

pub(crate) fn require_image_mime(mime_type: &str) -> Result<(), ApiError> {
    if mime_type.trim().to_ascii_lowercase().starts_with("image/") {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "Unsupported file type: {mime_type}"
        )))
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "timestamp": chrono::Utc::now().to_rfc3339() }))
}

/// Assemble the full application router
pub fn build_router(
    state: AppState,
    auth_state: AuthState,
    verify_limiter: RateLimitLayer,
    max_upload_bytes: usize,
) -> Router {
    let jwt_handler = auth_state.jwt_handler.clone();

    let auth_router = Router::new()
        .route("/api/auth/signup", post(auth_api::signup))
        .route("/api/auth/login", post(auth_api::login))
        .merge(
            Router::new()
                .route("/api/auth/me", get(auth_api::get_current_user))
                .route_layer(middleware::from_fn_with_state(
                    jwt_handler.clone(),
                    auth_middleware,
                )),
        )
        .with_state(auth_state);

    let protected_routes = Router::new()
        .route("/api/credits", get(payments::get_credits))
        .route(
            "/api/payments/verify",
            post(payments::verify_payment).layer(middleware::from_fn_with_state(
                verify_limiter,
                rate_limit_middleware,
            )),
        )
        .route("/api/payments/transactions", get(payments::list_transactions))
        .route(
            "/api/generations",
            get(generations::list_generations).post(generations::create_generation),
        )
        .route("/api/generations/:id/image", get(generations::get_generation_image))
        .route("/api/admin/users", get(admin::list_users))
        .route("/api/admin/transactions", get(admin::list_transactions))
        .route("/api/admin/users/:id/credits", put(admin::set_user_credits))
        .route("/api/admin/plans/:id", put(admin::update_plan))
        .route(
            "/api/admin/tracking",
            get(admin::get_tracking_settings).put(admin::update_tracking_settings),
        )
        .route_layer(middleware::from_fn_with_state(jwt_handler, auth_middleware))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/plans", get(payments::get_plans))
        .route("/api/templates", get(generations::list_templates))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(auth_router)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
