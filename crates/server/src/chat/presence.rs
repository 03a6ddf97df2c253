//! Presence registry and delivery router.
//!
//! Tracks which users have a live socket and pushes events to them. Each
//! connection owns a bounded outbound queue; the registry only ever
//! `try_send`s into it, so a slow client loses its own events instead of
//! holding up anyone else's connect, disconnect or delivery.
//!
//! All state sits behind a single mutex and every operation runs its
//! mutate-then-broadcast sequence without awaiting, so broadcasts are seen
//! in the same order by every connection.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::chat::protocol::ServerEvent;
use crate::core::models::Message;

/// Push side of a connection's outbound queue.
pub type ConnectionHandle = mpsc::Sender<ServerEvent>;

/// Identifies one physical connection. Returned by `connect`, handed back
/// to `disconnect` when the connection ends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    user_id: Option<String>,
    token: u64,
}

impl ConnectionId {
    /// User this connection registered as, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Set of user ids that currently have a live connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PresenceSnapshot(BTreeSet<String>);

impl PresenceSnapshot {
    pub fn contains(&self, user_id: &str) -> bool {
        self.0.contains(user_id)
    }
}

impl FromIterator<String> for PresenceSnapshot {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A point-to-point event for the router. Not retained after routing.
#[derive(Debug, Clone)]
pub struct DeliveryEvent {
    pub sender_id: String,
    pub recipient_id: String,
    pub payload: Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handed to the recipient's outbound queue (best effort).
    Routed,
    /// Recipient has no live connection.
    Unrouted,
}

#[derive(Default)]
struct RegistryState {
    next_token: u64,
    /// Every live connection, with or without a user id.
    connections: HashMap<u64, ConnectionHandle>,
    /// user id -> token of the connection currently representing that user.
    online: HashMap<String, u64>,
}

impl RegistryState {
    fn snapshot(&self) -> PresenceSnapshot {
        self.online.keys().cloned().collect()
    }

    fn broadcast_snapshot(&self) {
        let event = ServerEvent::OnlineUsers(self.snapshot());
        for (token, handle) in &self.connections {
            push(*token, handle, event.clone());
        }
    }

    fn handle_for(&self, user_id: &str) -> Option<(u64, &ConnectionHandle)> {
        let token = *self.online.get(user_id)?;
        self.connections.get(&token).map(|handle| (token, handle))
    }
}

fn push(token: u64, handle: &ConnectionHandle, event: ServerEvent) {
    match handle.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(
                "[Presence] Outbound queue full for connection {}, dropping event",
                token
            );
        }
        Err(TrySendError::Closed(_)) => {
            debug!("[Presence] Connection {} already closed", token);
        }
    }
}

/// Process-local registry of live connections. Share it as
/// `Arc<PresenceRegistry>`; separate instances are fully independent.
#[derive(Default)]
pub struct PresenceRegistry {
    state: Mutex<RegistryState>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and broadcast the updated snapshot to all
    /// connections, the new one included.
    ///
    /// A connection without a (non-empty) user id is kept only as a
    /// broadcast recipient: it never appears in the snapshot and never
    /// receives deliveries. A second connection for the same user replaces
    /// the first as that user's delivery target; the first connection is
    /// not closed here.
    pub fn connect(&self, user_id: Option<&str>, handle: ConnectionHandle) -> ConnectionId {
        let user_id = user_id.filter(|id| !id.is_empty()).map(str::to_owned);

        let mut state = self.state.lock();
        state.next_token += 1;
        let token = state.next_token;
        state.connections.insert(token, handle);

        match &user_id {
            Some(id) => {
                if let Some(previous) = state.online.insert(id.clone(), token) {
                    debug!(
                        "[Presence] {} reconnected, connection {} supersedes {}",
                        id, token, previous
                    );
                }
                info!("[Presence] {} online (connection {})", id, token);
            }
            None => debug!("[Presence] Untracked connection {}", token),
        }

        state.broadcast_snapshot();
        ConnectionId { user_id, token }
    }

    /// Remove a connection and broadcast the updated snapshot to the
    /// remaining connections.
    ///
    /// The user is only taken offline if `conn` is still the connection
    /// representing them; a late disconnect from a superseded connection
    /// leaves the newer one in place. Returns false (and broadcasts
    /// nothing) if the connection was already removed.
    pub fn disconnect(&self, conn: &ConnectionId) -> bool {
        let mut state = self.state.lock();
        if state.connections.remove(&conn.token).is_none() {
            return false;
        }

        if let Some(id) = &conn.user_id {
            if state.online.get(id) == Some(&conn.token) {
                state.online.remove(id);
                info!("[Presence] {} offline (connection {})", id, conn.token);
            } else {
                debug!(
                    "[Presence] Stale disconnect for {} (connection {}), newer connection kept",
                    id, conn.token
                );
            }
        }

        state.broadcast_snapshot();
        true
    }

    /// Forward `event.payload` to the recipient's live connection, if any.
    /// Never waits on the connection; a full or closed queue is logged and
    /// still counts as routed.
    pub fn route_delivery(&self, event: DeliveryEvent) -> DeliveryOutcome {
        let state = self.state.lock();
        match state.handle_for(&event.recipient_id) {
            Some((token, handle)) => {
                debug!(
                    "[Presence] Routing message {} from {} to {} (connection {})",
                    event.payload.id, event.sender_id, event.recipient_id, token
                );
                push(token, handle, ServerEvent::NewMessage(event.payload));
                DeliveryOutcome::Routed
            }
            None => DeliveryOutcome::Unrouted,
        }
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        self.state.lock().snapshot()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.state.lock().online.contains_key(user_id)
    }

    /// Number of live connections, tracked or not.
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::mpsc::Receiver;

    fn channel() -> (ConnectionHandle, Receiver<ServerEvent>) {
        mpsc::channel(16)
    }

    fn snapshot_of(ids: &[&str]) -> PresenceSnapshot {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn message(sender: &str, recipient: &str, text: &str) -> Message {
        Message {
            id: format!("{}-{}-{}", sender, recipient, text),
            sender_id: sender.into(),
            receiver_id: recipient.into(),
            text: Some(text.into()),
            image: None,
            seen: false,
            created_at: Utc::now(),
        }
    }

    fn delivery(sender: &str, recipient: &str, text: &str) -> DeliveryEvent {
        DeliveryEvent {
            sender_id: sender.into(),
            recipient_id: recipient.into(),
            payload: message(sender, recipient, text),
        }
    }

    fn drain(rx: &mut Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_connect_route_disconnect_scenario() {
        let registry = PresenceRegistry::new();
        let (h1, mut rx1) = channel();
        let (h2, mut rx2) = channel();

        let _c1 = registry.connect(Some("u1"), h1);
        assert_eq!(registry.snapshot(), snapshot_of(&["u1"]));
        assert_eq!(
            drain(&mut rx1),
            vec![ServerEvent::OnlineUsers(snapshot_of(&["u1"]))]
        );

        let c2 = registry.connect(Some("u2"), h2);
        assert_eq!(registry.snapshot(), snapshot_of(&["u1", "u2"]));
        let both = ServerEvent::OnlineUsers(snapshot_of(&["u1", "u2"]));
        assert_eq!(drain(&mut rx1), vec![both.clone()]);
        assert_eq!(drain(&mut rx2), vec![both]);

        let event = delivery("u2", "u1", "hi");
        let payload = event.payload.clone();
        assert_eq!(registry.route_delivery(event), DeliveryOutcome::Routed);
        assert_eq!(drain(&mut rx1), vec![ServerEvent::NewMessage(payload)]);
        assert!(drain(&mut rx2).is_empty());

        assert!(registry.disconnect(&c2));
        assert_eq!(registry.snapshot(), snapshot_of(&["u1"]));
        assert_eq!(
            drain(&mut rx1),
            vec![ServerEvent::OnlineUsers(snapshot_of(&["u1"]))]
        );

        assert_eq!(
            registry.route_delivery(delivery("u1", "u2", "gone?")),
            DeliveryOutcome::Unrouted
        );
        assert!(drain(&mut rx1).is_empty());
        assert!(drain(&mut rx2).is_empty());
    }

    #[test]
    fn test_unknown_recipient_is_unrouted() {
        let registry = PresenceRegistry::new();
        let (h1, mut rx1) = channel();
        registry.connect(Some("u1"), h1);
        drain(&mut rx1);

        assert_eq!(
            registry.route_delivery(delivery("u1", "nobody", "hello")),
            DeliveryOutcome::Unrouted
        );
        assert!(drain(&mut rx1).is_empty());
    }

    #[test]
    fn test_reconnect_replaces_entry() {
        let registry = PresenceRegistry::new();
        let (old, mut old_rx) = channel();
        let (new, mut new_rx) = channel();

        let first = registry.connect(Some("u1"), old);
        let second = registry.connect(Some("u1"), new);
        assert_ne!(first.token(), second.token());
        assert_eq!(registry.snapshot(), snapshot_of(&["u1"]));
        drain(&mut old_rx);
        drain(&mut new_rx);

        assert_eq!(
            registry.route_delivery(delivery("u2", "u1", "hi")),
            DeliveryOutcome::Routed
        );
        assert!(drain(&mut old_rx).is_empty());
        assert_eq!(drain(&mut new_rx).len(), 1);
    }

    #[test]
    fn test_stale_disconnect_keeps_newer_connection() {
        let registry = PresenceRegistry::new();
        let (old, _old_rx) = channel();
        let (new, mut new_rx) = channel();

        let first = registry.connect(Some("u1"), old);
        let _second = registry.connect(Some("u1"), new);
        drain(&mut new_rx);

        assert!(registry.disconnect(&first));
        assert!(registry.is_online("u1"));
        // Still one broadcast for the removed connection.
        assert_eq!(
            drain(&mut new_rx),
            vec![ServerEvent::OnlineUsers(snapshot_of(&["u1"]))]
        );
        assert_eq!(
            registry.route_delivery(delivery("u2", "u1", "still here")),
            DeliveryOutcome::Routed
        );
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let registry = PresenceRegistry::new();
        let (h1, _rx1) = channel();
        let (h2, mut rx2) = channel();

        let c1 = registry.connect(Some("u1"), h1);
        registry.connect(Some("u2"), h2);
        drain(&mut rx2);

        assert!(registry.disconnect(&c1));
        assert_eq!(drain(&mut rx2).len(), 1);

        assert!(!registry.disconnect(&c1));
        assert!(drain(&mut rx2).is_empty());
        assert_eq!(registry.snapshot(), snapshot_of(&["u2"]));
    }

    #[test]
    fn test_untracked_connection_gets_broadcasts_only() {
        let registry = PresenceRegistry::new();
        let (anon, mut anon_rx) = channel();
        let (empty, mut empty_rx) = channel();
        let (h1, _rx1) = channel();

        let anon_conn = registry.connect(None, anon);
        let empty_conn = registry.connect(Some(""), empty);
        assert_eq!(anon_conn.user_id(), None);
        assert_eq!(empty_conn.user_id(), None);
        assert_eq!(registry.snapshot(), PresenceSnapshot::default());
        assert_eq!(registry.connection_count(), 2);
        drain(&mut anon_rx);
        drain(&mut empty_rx);

        registry.connect(Some("u1"), h1);
        let expected = vec![ServerEvent::OnlineUsers(snapshot_of(&["u1"]))];
        assert_eq!(drain(&mut anon_rx), expected);
        assert_eq!(drain(&mut empty_rx), expected);

        assert_eq!(
            registry.route_delivery(delivery("u1", "", "x")),
            DeliveryOutcome::Unrouted
        );
        assert!(drain(&mut empty_rx).is_empty());
    }

    #[test]
    fn test_full_queue_drops_only_for_slow_consumer() {
        let registry = PresenceRegistry::new();
        let (slow, mut slow_rx) = mpsc::channel(1);
        let (fast, mut fast_rx) = channel();

        registry.connect(Some("slow"), slow);
        registry.connect(Some("fast"), fast);

        // slow's single slot holds the first broadcast; the second was dropped.
        assert_eq!(
            drain(&mut slow_rx),
            vec![ServerEvent::OnlineUsers(snapshot_of(&["slow"]))]
        );
        assert_eq!(
            drain(&mut fast_rx),
            vec![ServerEvent::OnlineUsers(snapshot_of(&["fast", "slow"]))]
        );
    }

    #[test]
    fn test_closed_handle_still_counts_as_routed() {
        let registry = PresenceRegistry::new();
        let (h1, rx1) = channel();
        registry.connect(Some("u1"), h1);
        drop(rx1);

        assert_eq!(
            registry.route_delivery(delivery("u2", "u1", "lost")),
            DeliveryOutcome::Routed
        );
    }

    #[test]
    fn test_snapshot_matches_model_over_random_sequence() {
        let registry = PresenceRegistry::new();
        let users = ["a", "b", "c", "d"];
        let mut live: Vec<ConnectionId> = Vec::new();
        let mut receivers = Vec::new();
        // user -> token of the most recent connect, cleared by its disconnect
        let mut model: HashMap<String, u64> = HashMap::new();

        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..500 {
            let roll = next();
            if live.is_empty() || roll % 3 != 0 {
                let user = users[(next() % users.len() as u64) as usize];
                let (handle, rx) = mpsc::channel(1024);
                receivers.push(rx);
                let conn = registry.connect(Some(user), handle);
                model.insert(user.to_string(), conn.token());
                live.push(conn);
            } else {
                let idx = (next() % live.len() as u64) as usize;
                let conn = live.swap_remove(idx);
                assert!(registry.disconnect(&conn));
                let user = conn.user_id().unwrap().to_string();
                if model.get(&user) == Some(&conn.token()) {
                    model.remove(&user);
                }
            }

            let expected: PresenceSnapshot = model.keys().cloned().collect();
            assert_eq!(registry.snapshot(), expected);
            assert_eq!(registry.connection_count(), live.len());
        }
    }
}
