//! Real-time layer: authenticated WebSocket sessions, topic rooms, and
//! event broadcast.
//!
//! The registry and broadcaster are plain injectable structs owned by
//! `AppState` — tests construct isolated instances per case.

pub mod actor;
pub mod events;
pub mod handler;
pub mod registry;
pub mod rooms;

use std::fmt;

/// A named broadcast channel. Two namespaces exist: per-project rooms for
/// task/comment/typing traffic, and per-user rooms for personal
/// notification delivery.
///
/// Topics are lazily created — membership is derived purely from join/leave
/// calls, and publishing to a topic nobody joined just drops the event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Project(String),
    User(String),
}

impl Topic {
    pub fn project(id: impl Into<String>) -> Self {
        Topic::Project(id.into())
    }

    pub fn user(id: impl Into<String>) -> Self {
        Topic::User(id.into())
    }

    /// Parse the wire form (`project:<id>` or `user:<id>`).
    pub fn parse(s: &str) -> Option<Self> {
        let (ns, id) = s.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        match ns {
            "project" => Some(Topic::Project(id.to_string())),
            "user" => Some(Topic::User(id.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Project(id) => write!(f, "project:{id}"),
            Topic::User(id) => write!(f, "user:{id}"),
        }
    }
}
