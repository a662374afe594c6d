//! Authentication API Endpoints

use crate::auth::{
    jwt::JwtHandler,
    models::{Claims, LoginRequest, LoginResponse, SignupRequest, UserResponse, UserRole},
    user_store::UserStore,
};
use crate::payments::CreditLedger;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub jwt_handler: Arc<JwtHandler>,
    /// Every new account gets a zero balance at signup
    pub ledger: CreditLedger,
}

impl AuthState {
    pub fn new(user_store: Arc<UserStore>, jwt_handler: Arc<JwtHandler>, ledger: CreditLedger) -> Self {
        Self {
            user_store,
            jwt_handler,
            ledger,
        }
    }
}

/// Signup endpoint - POST /api/auth/signup
pub async fn signup(
    State(state): State<AuthState>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), AuthApiError> {
    let email = payload.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AuthApiError::InvalidEmail);
    }
    if payload.full_name.trim().is_empty() {
        return Err(AuthApiError::MissingName);
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(AuthApiError::WeakPassword);
    }

    if state
        .user_store
        .get_user_by_email(email)
        .map_err(|_| AuthApiError::InternalError)?
        .is_some()
    {
        return Err(AuthApiError::UserAlreadyExists);
    }

    let user = state
        .user_store
        .create_user(
            email,
            &payload.password,
            &payload.full_name,
            &payload.country,
            UserRole::Member,
        )
        .map_err(|e| {
            warn!("Failed to create user: {}", e);
            AuthApiError::UserAlreadyExists
        })?;

    state.ledger.open_account(user.id).await.map_err(|e| {
        error!(user_id = %user.id, "failed to open credit account: {}", e);
        AuthApiError::InternalError
    })?;

    let (token, expires_in) = state
        .jwt_handler
        .generate_token(&user)
        .map_err(|_| AuthApiError::InternalError)?;

    info!("🆕 Signup: {}", user.email);

    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            token,
            expires_in,
            role: user.role.clone(),
            user: UserResponse::from_user(&user),
        }),
    ))
}

/// Login endpoint - POST /api/auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthApiError> {
    info!("🔐 Login attempt: {}", payload.email);

    let user = state
        .user_store
        .verify_password(&payload.email, &payload.password)
        .map_err(|_| AuthApiError::InternalError)?
        .ok_or_else(|| {
            warn!("❌ Failed login attempt: {}", payload.email);
            AuthApiError::InvalidCredentials
        })?;

    let (token, expires_in) = state
        .jwt_handler
        .generate_token(&user)
        .map_err(|_| AuthApiError::InternalError)?;

    info!("✅ Login successful: {} ({})", user.email, user.role.as_str());

    Ok(Json(LoginResponse {
        token,
        expires_in,
        role: user.role.clone(),
        user: UserResponse::from_user(&user),
    }))
}

/// Current user profile - GET /api/auth/me
pub async fn get_current_user(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, AuthApiError> {
    let user_id = claims.user_id().ok_or(AuthApiError::Unauthorized)?;
    let user = state
        .user_store
        .get_user(&user_id)
        .map_err(|_| AuthApiError::InternalError)?
        .ok_or(AuthApiError::Unauthorized)?;

    Ok(Json(UserResponse::from_user(&user)))
}

#[derive(Debug)]
pub enum AuthApiError {
    InvalidCredentials,
    Unauthorized,
    UserAlreadyExists,
    WeakPassword,
    InvalidEmail,
    MissingName,
    InternalError,
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid email or password")
            }
            AuthApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthApiError::UserAlreadyExists => {
                (StatusCode::CONFLICT, "An account with this email already exists")
            }
            AuthApiError::WeakPassword => (
                StatusCode::BAD_REQUEST,
                "Password must be at least 8 characters",
            ),
            AuthApiError::InvalidEmail => (StatusCode::BAD_REQUEST, "Invalid email address"),
            AuthApiError::MissingName => (StatusCode::BAD_REQUEST, "Full name is required"),
            AuthApiError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use axum::{body::Body, http::Request, routing::post, Router};
    use serde_json::{json, Value};
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    fn create_test_state() -> (AuthState, NamedTempFile, NamedTempFile) {
        let auth_db = NamedTempFile::new().unwrap();
        let credits_db = NamedTempFile::new().unwrap();
        let store = UserStore::new(auth_db.path().to_str().unwrap())
            .unwrap()
            .with_hash_cost(4);
        let db = Database::open(credits_db.path().to_str().unwrap()).unwrap();
        let state = AuthState::new(
            Arc::new(store),
            Arc::new(JwtHandler::new("test-secret".to_string())),
            CreditLedger::new(db),
        );
        (state, auth_db, credits_db)
    }

    fn app(state: AuthState) -> Router {
        Router::new()
            .route("/signup", post(signup))
            .route("/login", post(login))
            .with_state(state)
    }

    fn json_post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_signup_opens_zero_balance_and_logs_in() {
        let (state, _a, _c) = create_test_state();
        let ledger = state.ledger.clone();
        let store = state.user_store.clone();
        let app = app(state);

        let resp = app
            .clone()
            .oneshot(json_post(
                "/signup",
                json!({"email": "sana@example.com", "password": "password123", "fullName": "Sana", "country": "Pakistan"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let user = store.get_user_by_email("sana@example.com").unwrap().unwrap();
        assert_eq!(ledger.balance(user.id).await.unwrap(), 0);

        let resp = app
            .clone()
            .oneshot(json_post(
                "/login",
                json!({"email": "sana@example.com", "password": "password123"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(json_post(
                "/login",
                json!({"email": "sana@example.com", "password": "nope-nope"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signup_validation() {
        let (state, _a, _c) = create_test_state();
        let app = app(state);

        let weak = app
            .clone()
            .oneshot(json_post(
                "/signup",
                json!({"email": "a@b.com", "password": "short", "fullName": "A"}),
            ))
            .await
            .unwrap();
        assert_eq!(weak.status(), StatusCode::BAD_REQUEST);

        let bad_email = app
            .clone()
            .oneshot(json_post(
                "/signup",
                json!({"email": "not-an-email", "password": "password123", "fullName": "A"}),
            ))
            .await
            .unwrap();
        assert_eq!(bad_email.status(), StatusCode::BAD_REQUEST);

        let body = json!({"email": "a@b.com", "password": "password123", "fullName": "A"});
        let first = app.clone().oneshot(json_post("/signup", body.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let dup = app.oneshot(json_post("/signup", body)).await.unwrap();
        assert_eq!(dup.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_auth_api_error_responses() {
        assert_eq!(
            AuthApiError::InvalidCredentials.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthApiError::WeakPassword.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthApiError::UserAlreadyExists.into_response().status(),
            StatusCode::CONFLICT
        );
    }
}
