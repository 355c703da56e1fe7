//! Wire messages exchanged over the WebSocket, as two tagged unions.
//!
//! Frames are JSON text: `{"event": "<name>", "data": {...}}`. Keeping both
//! directions as enums makes the valid message set exhaustively enumerable —
//! dispatch is one `match`, and an unhandled variant is a compile error.

use serde::{Deserialize, Serialize};

use crate::comments::CommentView;
use crate::notifications::NotificationView;
use crate::tasks::TaskView;

/// Events a client may send after the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join:project")]
    JoinProject {
        #[serde(rename = "projectId")]
        project_id: String,
    },
    #[serde(rename = "leave:project")]
    LeaveProject {
        #[serde(rename = "projectId")]
        project_id: String,
    },
    #[serde(rename = "join:user")]
    JoinUser {
        #[serde(rename = "userId")]
        user_id: String,
    },
    #[serde(rename = "leave:user")]
    LeaveUser {
        #[serde(rename = "userId")]
        user_id: String,
    },
    #[serde(rename = "startTyping")]
    StartTyping { topic: String },
    #[serde(rename = "stopTyping")]
    StopTyping { topic: String },
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
}

/// Events the server emits to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "onlineUsers")]
    OnlineUsers(Vec<OnlineUser>),
    #[serde(rename = "task:updated")]
    TaskUpdated(TaskView),
    #[serde(rename = "comment:new")]
    CommentNew(CommentView),
    #[serde(rename = "notification:new")]
    NotificationNew(NotificationView),
    #[serde(rename = "userTyping")]
    UserTyping {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "displayName")]
        display_name: String,
        topic: String,
    },
    #[serde(rename = "userStoppedTyping")]
    UserStoppedTyping {
        #[serde(rename = "userId")]
        user_id: String,
        topic: String,
    },
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },
}

/// Roster entry carried by the `onlineUsers` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineUser {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub name: String,
}
