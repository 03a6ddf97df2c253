//! Core Router
//!
//! Account routes: public signup/login plus the authenticated user routes.

use crate::core::auth::handlers as auth_handlers;
use crate::core::auth::middleware::mw_require_auth;
use crate::core::AppState;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/api/user/check", get(auth_handlers::check))
        .route("/api/user/logout", post(auth_handlers::logout))
        .route("/api/user/update-profile", put(auth_handlers::update_profile))
        .route_layer(middleware::from_fn_with_state(state, mw_require_auth));

    Router::new()
        .route("/api/user/signup", post(auth_handlers::signup))
        .route("/api/user/login", post(auth_handlers::login))
        .merge(protected)
}
