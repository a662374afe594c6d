//! Admin endpoints
//!
//! Every handler first turns the caller's claims into an `AdminActor`;
//! member tokens get 403 before anything is read.

use crate::api::payments::LimitQuery;
use crate::api::{ApiError, AppState};
use crate::auth::models::{Claims, UserResponse};
use crate::payments::{AdminActor, PixelSettings, Plan, TransactionRecord};
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

fn admin_actor(claims: &Claims) -> Result<AdminActor, ApiError> {
    AdminActor::from_claims(claims).ok_or(ApiError::Forbidden)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserView {
    #[serde(flatten)]
    pub user: UserResponse,
    pub credits: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetCreditsRequest {
    pub credits: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCreditsResponse {
    pub user_id: Uuid,
    pub credits: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlanRequest {
    pub price: i64,
    pub credits: i64,
}

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<AdminUserView>>, ApiError> {
    admin_actor(&claims)?;

    let balances: HashMap<Uuid, i64> = state
        .admin_ledger
        .list_balances()
        .await?
        .into_iter()
        .collect();
    let users = state.user_store.list_users()?;

    let views = users
        .iter()
        .map(|u| AdminUserView {
            user: UserResponse::from_user(u),
            credits: balances.get(&u.id).copied().unwrap_or(0),
        })
        .collect();
    Ok(Json(views))
}

/// GET /api/admin/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    admin_actor(&claims)?;
    let rows = state.history.list_all(q.limit.unwrap_or(500)).await?;
    Ok(Json(rows))
}

/// PUT /api/admin/users/:id/credits
pub async fn set_user_credits(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<SetCreditsRequest>,
) -> Result<Json<SetCreditsResponse>, ApiError> {
    let actor = admin_actor(&claims)?;
    if state.user_store.get_user(&user_id)?.is_none() {
        return Err(ApiError::NotFound("User"));
    }

    let credits = state
        .admin_ledger
        .set_balance(&actor, user_id, payload.credits)
        .await?;
    Ok(Json(SetCreditsResponse { user_id, credits }))
}

/// PUT /api/admin/plans/:id
pub async fn update_plan(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(plan_id): Path<String>,
    Json(payload): Json<UpdatePlanRequest>,
) -> Result<Json<Plan>, ApiError> {
    admin_actor(&claims)?;
    if payload.price <= 0 || payload.credits <= 0 {
        return Err(ApiError::BadRequest(
            "Price and credits must be positive".to_string(),
        ));
    }

    let plan = state
        .plans
        .update(&plan_id, payload.price, payload.credits)
        .await?
        .ok_or(ApiError::NotFound("Plan"))?;
    Ok(Json(plan))
}

/// GET /api/admin/tracking
pub async fn get_tracking_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<PixelSettings>, ApiError> {
    admin_actor(&claims)?;
    Ok(Json(state.tracker.settings()))
}

/// PUT /api/admin/tracking
///
/// Replaces both pixel IDs; an omitted or blank ID turns that pixel off.
/// Settings live in memory and fall back to the environment on restart.
pub async fn update_tracking_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<PixelSettings>,
) -> Result<Json<PixelSettings>, ApiError> {
    let actor = admin_actor(&claims)?;
    let stored = state.tracker.update_settings(payload);
    info!(admin = %actor.name(), "tracking pixels changed");
    Ok(Json(stored))
}
