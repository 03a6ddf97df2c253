//! WebSocket gateway: one socket per client, registered with the presence
//! registry for its whole lifetime.

use crate::chat::presence::PresenceSnapshot;
use crate::chat::protocol::ServerEvent;
use crate::core::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

/// GET /socket?userId=...
pub async fn socket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SocketQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, query.user_id, state))
}

/// GET /api/presence
pub async fn get_presence(State(state): State<AppState>) -> Json<PresenceSnapshot> {
    Json(state.presence.snapshot())
}

async fn handle_socket(socket: WebSocket, user_id: Option<String>, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.outbound_queue_capacity);

    let conn = state.presence.connect(user_id.as_deref(), tx);
    info!(
        "Socket connected: {} (connection {})",
        conn.user_id().unwrap_or("<anonymous>"),
        conn.token()
    );

    // Outbound queue -> socket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize socket event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                debug!("Socket send failed, client gone");
                break;
            }
        }
    });

    // Socket -> nothing; the client only needs to be watched for close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Socket error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.presence.disconnect(&conn);
    info!(
        "Socket disconnected: {} (connection {})",
        conn.user_id().unwrap_or("<anonymous>"),
        conn.token()
    );
}
