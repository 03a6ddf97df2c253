//! Socket wire protocol. The socket is push-only: the server sends these
//! events as JSON text frames and ignores anything the client sends.

use serde::Serialize;

use crate::chat::presence::PresenceSnapshot;
use crate::core::models::Message;

/// Events pushed to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full set of online user ids, sent on every connect/disconnect.
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers(PresenceSnapshot),

    /// A message addressed to this client's user.
    #[serde(rename = "newMessage")]
    NewMessage(Message),
}

impl ServerEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
