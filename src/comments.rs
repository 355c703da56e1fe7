//! Task comments: list and create.
//!
//! A new comment is broadcast to the project room as `comment:new`; nothing
//! durable is written beyond the comment row itself.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::models::TaskRow;
use crate::fanout::{self, Mutation};
use crate::pagination::{Page, Pagination};
use crate::projects;
use crate::state::AppState;

/// Comment with its author's display name joined in, as clients render it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: String,
    pub task_id: String,
    pub author_id: String,
    pub author_name: String,
    pub body: String,
    pub created_at: String,
}

impl CommentView {
    fn from_joined_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            task_id: row.get("task_id")?,
            author_id: row.get("author_id")?,
            author_name: row.get("author_name")?,
            body: row.get("body")?,
            created_at: row.get("created_at")?,
        })
    }
}

const SELECT_JOINED: &str = "SELECT c.id, c.task_id, c.author_id, c.body, c.created_at,
                                    u.display_name AS author_name
                             FROM comments c JOIN users u ON u.id = c.author_id";

/// GET /api/tasks/{id}/comments — oldest first, paginated.
pub async fn list_comments(
    State(state): State<AppState>,
    claims: Claims,
    Path(task_id): Path<String>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<CommentView>>, StatusCode> {
    let db = state.db.clone();
    let (limit, offset) = pagination.limit_offset();

    let (comments, total) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let task = conn
            .query_row("SELECT * FROM tasks WHERE id = ?1", [&task_id], TaskRow::from_row)
            .map_err(|_| StatusCode::NOT_FOUND)?;
        projects::load_for_member(&conn, &task.project_id, &claims)?;

        let total: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM comments WHERE task_id = ?1",
                [&task_id],
                |row| row.get(0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let sql = format!("{SELECT_JOINED} WHERE c.task_id = ?1 ORDER BY c.created_at LIMIT ?2 OFFSET ?3");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let comments: Vec<CommentView> = stmt
            .query_map(
                rusqlite::params![task_id, limit, offset],
                CommentView::from_joined_row,
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, StatusCode>((comments, total))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(Page::new(comments, total, &pagination)))
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub body: String,
}

/// POST /api/tasks/{id}/comments
pub async fn create_comment(
    State(state): State<AppState>,
    claims: Claims,
    Path(task_id): Path<String>,
    Json(body): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<CommentView>), StatusCode> {
    let text = body.body.trim().to_string();
    if text.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let author_id = claims.sub.clone();
    let author_name = claims.name.clone();
    let claims_for_db = claims.clone();
    let task_for_db = task_id.clone();

    let (comment, project_id) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let task = conn
            .query_row("SELECT * FROM tasks WHERE id = ?1", [&task_for_db], TaskRow::from_row)
            .map_err(|_| StatusCode::NOT_FOUND)?;
        projects::load_for_member(&conn, &task.project_id, &claims_for_db)?;

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO comments (id, task_id, author_id, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, task_for_db, author_id, text, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let comment = CommentView {
            id,
            task_id: task_for_db,
            author_id,
            author_name,
            body: text,
            created_at: now,
        };
        Ok::<_, StatusCode>((comment, task.project_id))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    // Best-effort broadcast; the comment row has already committed.
    let mutation = Mutation::CommentAdded {
        project_id,
        comment: comment.clone(),
    };
    if let Err(e) = fanout::dispatch(&state, mutation).await {
        tracing::warn!(comment_id = %comment.id, error = %e, "Comment fan-out failed");
    }

    Ok((StatusCode::CREATED, Json(comment)))
}
