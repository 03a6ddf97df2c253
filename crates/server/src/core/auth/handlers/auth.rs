//! Auth handlers

use crate::core::auth::ProfileUpdate;
use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::Result;
use crate::core::models::UserProfile;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub password: String,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: UserProfile,
}

/// POST /api/user/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    info!("POST /api/user/signup - {}", req.email);

    let (user, session) = state
        .auth
        .signup(&req.email, &req.full_name, &req.password, req.bio)
        .await
        .inspect_err(|e| warn!("Signup failed for {}: {}", req.email, e))?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token: session.token,
            user,
        }),
    ))
}

/// POST /api/user/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    info!("POST /api/user/login - {}", req.email);

    let (user, session) = state
        .auth
        .login(&req.email, &req.password)
        .await
        .inspect_err(|e| warn!("Login failed for {}: {}", req.email, e))?;

    Ok(Json(AuthResponse {
        token: session.token,
        user,
    }))
}

/// POST /api/user/logout
pub async fn logout(State(state): State<AppState>, ctx: Ctx) -> Result<StatusCode> {
    info!("POST /api/user/logout - {}", ctx.user_id());
    state.auth.logout(ctx.token()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/user/update-profile
pub async fn update_profile(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<ProfileUpdate>,
) -> Result<Json<UserResponse>> {
    info!("PUT /api/user/update-profile - {}", ctx.user_id());

    let user = state.auth.update_profile(ctx.user_id(), req).await?;
    Ok(Json(UserResponse { user }))
}
