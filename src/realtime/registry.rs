//! Session registry: source of truth for "who is online right now".
//!
//! Maps live connection ids to authenticated identities plus the sender half
//! of each connection's outbound channel. A user can have multiple concurrent
//! connections (multiple devices/tabs), tracked through a reverse index.

use std::collections::HashSet;
use std::time::Instant;

use axum::extract::ws::Message;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::realtime::events::OnlineUser;

/// Opaque identifier assigned to a connection at handshake time.
pub type ConnectionId = Uuid;

/// Sender half of a connection's outbound channel. Cloning this lets any part
/// of the system push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Authenticated identity attached to a live connection.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub role: String,
}

struct Session {
    identity: Identity,
    sender: ConnectionSender,
    last_heartbeat: Instant,
}

/// A connection id was registered twice. Transport-assigned ids are unique,
/// so this is a programmer error, not an operational condition.
#[derive(Debug, Error)]
#[error("connection {0} is already registered")]
pub struct DuplicateConnection(pub ConnectionId);

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Session>,
    by_user: DashMap<String, HashSet<ConnectionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Fails if the id is already present.
    pub fn register(
        &self,
        id: ConnectionId,
        identity: Identity,
        sender: ConnectionSender,
    ) -> Result<(), DuplicateConnection> {
        match self.sessions.entry(id) {
            dashmap::Entry::Occupied(_) => return Err(DuplicateConnection(id)),
            dashmap::Entry::Vacant(slot) => {
                slot.insert(Session {
                    identity: identity.clone(),
                    sender,
                    last_heartbeat: Instant::now(),
                });
            }
        }
        self.by_user.entry(identity.user_id).or_default().insert(id);
        Ok(())
    }

    /// Remove a connection. Idempotent: double-disconnect notifications are
    /// possible, so an absent id is a no-op, not an error.
    pub fn deregister(&self, id: ConnectionId) -> Option<Identity> {
        let (_, session) = self.sessions.remove(&id)?;

        let user_id = session.identity.user_id.clone();
        let mut drop_user = false;
        if let Some(mut set) = self.by_user.get_mut(&user_id) {
            set.remove(&id);
            drop_user = set.is_empty();
        }
        if drop_user {
            self.by_user.remove_if(&user_id, |_, set| set.is_empty());
        }

        Some(session.identity)
    }

    /// Snapshot of currently registered connections and their identities.
    /// No ordering guarantee beyond "some order".
    pub fn list_online(&self) -> Vec<(ConnectionId, Identity)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().identity.clone()))
            .collect()
    }

    /// Online roster for the `onlineUsers` broadcast: one entry per user,
    /// regardless of how many connections they hold.
    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.by_user
            .iter()
            .filter_map(|entry| {
                let conn_id = entry.value().iter().next().copied()?;
                let session = self.sessions.get(&conn_id)?;
                Some(OnlineUser {
                    user_id: session.identity.user_id.clone(),
                    name: session.identity.display_name.clone(),
                })
            })
            .collect()
    }

    /// Connection ids currently owned by a user (0, 1, or many).
    pub fn connections_for_user(&self, user_id: &str) -> HashSet<ConnectionId> {
        self.by_user
            .get(user_id)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// Push a message to one connection. Returns false if the connection is
    /// gone or its channel is closed — the caller treats that as droppable.
    pub fn send(&self, id: ConnectionId, msg: &Message) -> bool {
        match self.sessions.get(&id) {
            Some(session) => session.sender.send(msg.clone()).is_ok(),
            None => false,
        }
    }

    /// Record a heartbeat response from a connection.
    pub fn touch(&self, id: ConnectionId) {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.last_heartbeat = Instant::now();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn identity(user: &str) -> Identity {
        Identity {
            user_id: user.to_string(),
            display_name: user.to_uppercase(),
            role: "member".to_string(),
        }
    }

    fn sender() -> (ConnectionSender, mpsc::UnboundedReceiver<Message>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn register_deregister_yields_set_difference() {
        let registry = SessionRegistry::new();
        let ids: Vec<ConnectionId> = (0..4).map(|_| Uuid::new_v4()).collect();
        let mut keep = Vec::new();

        for id in &ids {
            let (tx, rx) = sender();
            keep.push(rx);
            registry.register(*id, identity("u"), tx).unwrap();
        }
        registry.deregister(ids[1]);
        registry.deregister(ids[3]);

        let online: HashSet<ConnectionId> =
            registry.list_online().into_iter().map(|(id, _)| id).collect();
        let expected: HashSet<ConnectionId> = [ids[0], ids[2]].into_iter().collect();
        assert_eq!(online, expected);
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let (tx_a, _rx_a) = sender();
        let (tx_b, _rx_b) = sender();

        registry.register(id, identity("a"), tx_a).unwrap();
        assert!(registry.register(id, identity("a"), tx_b).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn deregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = sender();

        registry.register(id, identity("a"), tx).unwrap();
        assert!(registry.deregister(id).is_some());
        assert!(registry.deregister(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn multiple_tabs_collapse_to_one_roster_entry() {
        let registry = SessionRegistry::new();
        let (tx_a, _rx_a) = sender();
        let (tx_b, _rx_b) = sender();
        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();

        registry.register(conn_a, identity("u1"), tx_a).unwrap();
        registry.register(conn_b, identity("u1"), tx_b).unwrap();

        assert_eq!(registry.online_users().len(), 1);
        assert_eq!(registry.connections_for_user("u1").len(), 2);

        registry.deregister(conn_a);
        assert_eq!(registry.online_users().len(), 1);
        registry.deregister(conn_b);
        assert!(registry.online_users().is_empty());
        assert!(registry.connections_for_user("u1").is_empty());
    }
}
