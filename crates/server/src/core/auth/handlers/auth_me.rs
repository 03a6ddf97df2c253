use super::auth::UserResponse;
use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::Result;
use axum::extract::State;
use axum::Json;

/// GET /api/user/check
pub async fn check(State(state): State<AppState>, ctx: Ctx) -> Result<Json<UserResponse>> {
    // The middleware already resolved the token; only the user lookup remains.
    let user = state.auth.get_user(ctx.user_id()).await?;

    Ok(Json(UserResponse { user }))
}
