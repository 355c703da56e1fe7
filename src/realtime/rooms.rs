//! Room broadcaster: topic subscriptions over live connections.
//!
//! Membership is a pair of indexes (topic → connections, connection →
//! topics) so a closing connection can leave everything it joined in one
//! call. Delivery resolves senders through the injected session registry;
//! sends to connections that are already gone are silently dropped.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use thiserror::Error;

use crate::realtime::events::ServerEvent;
use crate::realtime::registry::{ConnectionId, SessionRegistry};
use crate::realtime::Topic;

/// Publishing can only fail before delivery starts, while encoding the
/// event. Per-connection send failures are not errors — a connection that
/// closed mid-broadcast just misses the event.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct RoomBroadcaster {
    registry: Arc<SessionRegistry>,
    members: DashMap<Topic, HashSet<ConnectionId>>,
    joined: DashMap<ConnectionId, HashSet<Topic>>,
}

impl RoomBroadcaster {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            members: DashMap::new(),
            joined: DashMap::new(),
        }
    }

    /// Subscribe a connection to a topic. Joining twice is a no-op.
    pub fn join(&self, conn: ConnectionId, topic: Topic) {
        self.members.entry(topic.clone()).or_default().insert(conn);
        self.joined.entry(conn).or_default().insert(topic);
    }

    /// Unsubscribe a connection from a topic. Leaving a topic the
    /// connection never joined is a no-op.
    pub fn leave(&self, conn: ConnectionId, topic: &Topic) {
        let mut drop_topic = false;
        if let Some(mut set) = self.members.get_mut(topic) {
            set.remove(&conn);
            drop_topic = set.is_empty();
        }
        if drop_topic {
            self.members.remove_if(topic, |_, set| set.is_empty());
        }

        let mut drop_conn = false;
        if let Some(mut set) = self.joined.get_mut(&conn) {
            set.remove(topic);
            drop_conn = set.is_empty();
        }
        if drop_conn {
            self.joined.remove_if(&conn, |_, set| set.is_empty());
        }
    }

    /// Remove a connection from every topic it had joined. Called on
    /// connection close.
    pub fn leave_all(&self, conn: ConnectionId) {
        let topics = match self.joined.remove(&conn) {
            Some((_, topics)) => topics,
            None => return,
        };
        for topic in topics {
            let mut drop_topic = false;
            if let Some(mut set) = self.members.get_mut(&topic) {
                set.remove(&conn);
                drop_topic = set.is_empty();
            }
            if drop_topic {
                self.members.remove_if(&topic, |_, set| set.is_empty());
            }
        }
    }

    /// Topics a connection is currently subscribed to.
    pub fn topics_for(&self, conn: ConnectionId) -> HashSet<Topic> {
        self.joined
            .get(&conn)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// Deliver an event to every subscriber of a topic, optionally skipping
    /// the origin connection (typing indicators must not echo back to the
    /// sender). Returns the number of connections reached. A topic with no
    /// subscribers delivers to nobody, which is valid.
    pub fn publish(
        &self,
        topic: &Topic,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> Result<usize, PublishError> {
        let msg = encode(event)?;

        // Snapshot membership so sends happen outside the map lock
        let targets: Vec<ConnectionId> = match self.members.get(topic) {
            Some(set) => set.iter().copied().collect(),
            None => return Ok(0),
        };

        let mut delivered = 0;
        for conn in targets {
            if Some(conn) == exclude {
                continue;
            }
            if self.registry.send(conn, &msg) {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Deliver an event to every live connection regardless of topic.
    /// Used only for the online-users roster.
    pub fn broadcast_all(&self, event: &ServerEvent) -> Result<usize, PublishError> {
        let msg = encode(event)?;

        let mut delivered = 0;
        for (conn, _) in self.registry.list_online() {
            if self.registry.send(conn, &msg) {
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}

fn encode(event: &ServerEvent) -> Result<Message, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(Message::Text(json.into()))
}
