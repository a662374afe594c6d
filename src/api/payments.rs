//! Plans, balances and receipt verification endpoints

use crate::api::{caller_id, decode_image, require_image_mime, ApiError, AppState};
use crate::auth::models::Claims;
use crate::payments::{
    Plan, ReasonCode, TransactionRecord, VerificationRequest, VerificationResponse, Verdict,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub plan_id: String,
    /// Receipt screenshot, plain base64 or a data URL
    pub receipt_base64: String,
    pub mime_type: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub credits: i64,
}

/// GET /api/plans
pub async fn get_plans(State(state): State<AppState>) -> Result<Json<Vec<Plan>>, ApiError> {
    Ok(Json(state.plans.list().await?))
}

/// GET /api/credits
pub async fn get_credits(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let user_id = caller_id(&claims)?;
    let credits = state.ledger.balance(user_id).await?;
    Ok(Json(BalanceResponse { credits }))
}

/// GET /api/payments/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    let user_id = caller_id(&claims)?;
    let rows = state
        .history
        .list_for_user(user_id, q.limit.unwrap_or(50))
        .await?;
    Ok(Json(rows))
}

/// HTTP status for a verification outcome
pub fn verification_status(resp: &VerificationResponse) -> StatusCode {
    match (resp.decision, resp.reason_code) {
        (Verdict::Accept, _) => StatusCode::OK,
        (_, ReasonCode::TransportFailure) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

/// POST /api/payments/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<(StatusCode, Json<VerificationResponse>), ApiError> {
    let user_id = caller_id(&claims)?;
    require_image_mime(&payload.mime_type)?;
    let receipt_image = decode_image(&payload.receipt_base64)?;

    let plan = state
        .plans
        .get(&payload.plan_id)
        .await?
        .ok_or(ApiError::NotFound("Plan"))?;

    info!(
        user_id = %user_id,
        plan = %plan.id,
        expected = plan.price,
        bytes = receipt_image.len(),
        "🧾 Receipt submitted"
    );

    let resp = state
        .verifier
        .verify(VerificationRequest {
            user_id,
            plan,
            tolerance: state.receipt_tolerance,
            receipt_image,
            mime_type: payload.mime_type,
        })
        .await;

    Ok((verification_status(&resp), Json(resp)))
}
