//! Pull-based notification listing and read acknowledgement.
//!
//! Durable notifications are created by the fan-out rule set; this module
//! only reads them and flips `is_read`. Rows are never deleted here.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::db::models::NotificationRow;
use crate::pagination::{Page, Pagination};
use crate::state::AppState;

/// Wire shape of a notification, shared by the REST listing and the
/// `notification:new` WebSocket event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub recipient_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_project_id: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

impl From<NotificationRow> for NotificationView {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            message: row.message,
            kind: row.kind,
            recipient_user_id: row.recipient_id,
            related_task_id: row.related_task_id,
            related_project_id: row.related_project_id,
            is_read: row.is_read,
            created_at: row.created_at,
        }
    }
}

/// GET /api/notifications — the caller's notifications, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    claims: Claims,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<NotificationView>>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let (limit, offset) = pagination.limit_offset();

    let (rows, total) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let total: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1",
                [&user_id],
                |row| row.get(0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare(
                "SELECT * FROM notifications WHERE recipient_id = ?1
                 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let rows: Vec<NotificationRow> = stmt
            .query_map(
                rusqlite::params![user_id, limit, offset],
                NotificationRow::from_row,
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, StatusCode>((rows, total))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let items = rows.into_iter().map(NotificationView::from).collect();
    Ok(Json(Page::new(items, total, &pagination)))
}

/// POST /api/notifications/{id}/read — flip is_read on one of the caller's
/// notifications.
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(notification_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let changed = conn
            .execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND recipient_id = ?2",
                [&notification_id, &user_id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if changed == 0 {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok::<_, StatusCode>(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<ReadAllResponse>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let updated = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE recipient_id = ?1 AND is_read = 0",
            [&user_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(ReadAllResponse { updated }))
}

#[derive(Debug, Serialize)]
pub struct ReadAllResponse {
    pub updated: usize,
}
