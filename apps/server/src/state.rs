use axum::extract::ws::Message;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type Tx = mpsc::UnboundedSender<Message>;
pub type PeerMap = Arc<DashMap<String, Tx>>;
/// room_id -> member user ids
pub type RoomMap = Arc<DashMap<String, HashSet<String>>>;

/// Connection registry of the relay. It routes frames by recipient and
/// tracks room membership for presence fan-out; the call state machine
/// lives entirely in the clients.
#[derive(Clone, Default)]
pub struct AppState {
    pub peers: PeerMap,
    pub rooms: RoomMap,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            rooms: Arc::new(DashMap::new()),
        }
    }

    /// Register a connected user; a reconnect replaces the previous sender.
    pub fn register(&self, user_id: &str, tx: Tx) {
        self.peers.insert(user_id.to_string(), tx);
    }

    /// Remove the user from the peer map and every room. Returns the rooms
    /// the user was a member of.
    pub fn unregister(&self, user_id: &str) -> Vec<String> {
        self.peers.remove(user_id);

        let mut left = Vec::new();
        for mut entry in self.rooms.iter_mut() {
            if entry.value_mut().remove(user_id) {
                left.push(entry.key().clone());
            }
        }
        self.rooms.retain(|_, members| !members.is_empty());
        left
    }

    /// Add the user to a room, returning the other members to notify.
    pub fn join_room(&self, room_id: &str, user_id: &str) -> Vec<String> {
        let mut members = self.rooms.entry(room_id.to_string()).or_default();
        members.insert(user_id.to_string());
        members
            .iter()
            .filter(|m| m.as_str() != user_id)
            .cloned()
            .collect()
    }

    pub fn is_member(&self, room_id: &str, user_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .map(|members| members.contains(user_id))
            .unwrap_or(false)
    }

    /// Deliver raw text to a single connected user. Returns false when the
    /// user has no live connection.
    pub fn send_to(&self, user_id: &str, text: &str) -> bool {
        match self.peers.get(user_id) {
            Some(tx) => tx.send(Message::Text(text.to_string())).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_room_reports_existing_members() {
        let state = AppState::new();

        assert!(state.join_room("room1", "alice").is_empty());
        let others = state.join_room("room1", "bob");
        assert_eq!(others, vec!["alice".to_string()]);

        assert!(state.is_member("room1", "alice"));
        assert!(state.is_member("room1", "bob"));
        assert!(!state.is_member("room2", "alice"));
    }

    #[tokio::test]
    async fn unregister_removes_user_everywhere() {
        let state = AppState::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        state.register("alice", tx);
        state.join_room("room1", "alice");
        state.join_room("room2", "alice");

        let left = state.unregister("alice");
        assert_eq!(left.len(), 2);
        assert!(!state.is_member("room1", "alice"));
        assert!(!state.send_to("alice", "hello"));
    }

    #[tokio::test]
    async fn send_to_delivers_to_connected_peers_only() {
        let state = AppState::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.register("bob", tx);

        assert!(state.send_to("bob", "frame"));
        assert!(!state.send_to("nobody", "frame"));

        match rx.recv().await {
            Some(Message::Text(text)) => assert_eq!(text, "frame"),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
