use std::sync::Arc;

use crate::db::DbPool;
use crate::realtime::registry::SessionRegistry;
use crate::realtime::rooms::RoomBroadcaster;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Live WebSocket sessions (who is online right now)
    pub sessions: Arc<SessionRegistry>,
    /// Topic rooms over the live sessions
    pub rooms: Arc<RoomBroadcaster>,
}

impl AppState {
    /// Wire up a state with fresh realtime components.
    pub fn new(db: DbPool, jwt_secret: Vec<u8>) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let rooms = Arc::new(RoomBroadcaster::new(sessions.clone()));
        Self {
            db,
            jwt_secret,
            sessions,
            rooms,
        }
    }
}
