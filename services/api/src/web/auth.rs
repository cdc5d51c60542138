//! services/api/src/web/auth.rs
//!
//! Authentication endpoints: signup, login, access-token refresh, logout, and
//! a `/me` endpoint describing the current caller.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use learnhub_core::domain::{CredentialKind, Role};
use learnhub_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::middleware::{bearer_token, CurrentIdentity};
use crate::web::state::AppState;

const MIN_PASSWORD_LEN: usize = 8;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TokenPairResponse {
    pub token_type: String,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AccessTokenResponse {
    pub token_type: String,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub subject: String,
    pub roles: Vec<String>,
    pub expires_in_seconds: Option<i64>,
}

/// Roles carried in an access token for an account with `role`.
fn granted_roles(role: Role) -> Vec<Role> {
    match role {
        Role::Member => vec![Role::Member],
        Role::Admin => vec![Role::Member, Role::Admin],
    }
}

fn invalid_login() -> ApiError {
    ApiError::Port(PortError::Unauthorized)
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a new member account
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("A valid email is required".to_string()));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    // 1. Hash the password
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            ApiError::Internal("Failed to hash password".to_string())
        })?
        .to_string();

    // 2. Create user in database
    let user = state
        .db
        .create_user(&email, &password_hash, Role::Member)
        .await?;
    info!("Account created for {}", user.email);

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            user_id: user.user_id,
            email: user.email,
            role: user.role.as_str().to_string(),
        }),
    ))
}

/// POST /auth/login - Exchange email and password for an access/refresh pair
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();

    // 1. Get user by email
    let creds = match state.db.get_credentials_by_email(&email).await {
        Ok(creds) => creds,
        Err(PortError::NotFound(_)) => return Err(invalid_login()),
        Err(e) => return Err(e.into()),
    };

    // 2. Verify password
    let parsed_hash = PasswordHash::new(&creds.hashed_password).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        ApiError::Internal("Authentication error".to_string())
    })?;
    if Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        warn!("Failed login for {}", email);
        return Err(invalid_login());
    }

    // 3. Issue credentials and remember the refresh token
    let access = state
        .tokens
        .issue_access(&creds.email, &granted_roles(creds.role))?;
    let refresh = state.tokens.issue_refresh(&creds.email)?;
    state
        .db
        .store_refresh_token(&creds.email, &refresh.token, refresh.expires_at)
        .await?;
    info!("{} logged in", creds.email);

    Ok(Json(TokenPairResponse {
        token_type: "Bearer".to_string(),
        access_token: access.token,
        access_expires_at: access.expires_at,
        refresh_token: refresh.token,
        refresh_expires_at: refresh.expires_at,
    }))
}

/// POST /auth/refresh - Exchange a live refresh token for a new access token
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AccessTokenResponse>, ApiError> {
    let identity = state
        .tokens
        .validate(&req.refresh_token, CredentialKind::Refresh)?;

    let stored = state.db.get_refresh_token(&identity.subject).await?;
    if stored.as_deref() != Some(req.refresh_token.as_str()) {
        warn!("Refresh token for {} is not the current one", identity.subject);
        return Err(PortError::Unauthorized.into());
    }

    let user = match state.db.get_user_by_email(&identity.subject).await {
        Ok(user) => user,
        Err(PortError::NotFound(_)) => return Err(PortError::Unauthorized.into()),
        Err(e) => return Err(e.into()),
    };
    let access = state
        .tokens
        .issue_access(&user.email, &granted_roles(user.role))?;

    Ok(Json(AccessTokenResponse {
        token_type: "Bearer".to_string(),
        access_token: access.token,
        access_expires_at: access.expires_at,
    }))
}

/// POST /auth/logout - Revoke the stored refresh token
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<StatusCode, ApiError> {
    let identity = state
        .tokens
        .validate(&req.refresh_token, CredentialKind::Refresh)?;

    let stored = state.db.get_refresh_token(&identity.subject).await?;
    if stored.as_deref() != Some(req.refresh_token.as_str()) {
        return Err(PortError::Unauthorized.into());
    }
    state.db.delete_refresh_token(&identity.subject).await?;
    info!("{} logged out", identity.subject);

    Ok(StatusCode::NO_CONTENT)
}

/// GET /me - The authenticated caller and the remaining lifetime of its token
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    headers: HeaderMap,
) -> Json<MeResponse> {
    let expires_in_seconds = bearer_token(&headers)
        .and_then(|token| state.tokens.remaining_lifetime(token))
        .map(|d| d.num_seconds());

    Json(MeResponse {
        subject: identity.subject,
        roles: identity
            .roles
            .iter()
            .map(|r| r.as_str().to_string())
            .collect(),
        expires_in_seconds,
    })
}
