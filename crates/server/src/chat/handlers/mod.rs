//! Chat Handlers and Router
//!
//! Message routes (behind auth), the presence snapshot and the socket.

use crate::core::auth::middleware::mw_require_auth;
use crate::core::AppState;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

pub mod messages;
pub mod socket;

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/api/message/users", get(messages::list_users))
        .route("/api/message/{id}", get(messages::get_messages))
        .route("/api/message/mark/{id}", put(messages::mark_seen))
        .route("/api/message/send/{id}", post(messages::send_message))
        .route_layer(middleware::from_fn_with_state(state, mw_require_auth));

    Router::new()
        .route("/api/presence", get(socket::get_presence))
        .route("/socket", get(socket::socket_handler))
        .merge(protected)
}
