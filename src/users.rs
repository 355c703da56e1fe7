//! User listing and profile endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::db::models::UserRow;
use crate::pagination::{Page, Pagination};
use crate::state::AppState;

/// Public view of a user (no credential material).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub created_at: String,
}

impl From<UserRow> for UserView {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            display_name: row.display_name,
            role: row.role,
            created_at: row.created_at,
        }
    }
}

/// GET /api/users — full user listing. Admin only.
pub async fn list_users(
    State(state): State<AppState>,
    claims: Claims,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<UserView>>, StatusCode> {
    if !claims.is_admin() {
        return Err(StatusCode::FORBIDDEN);
    }

    let db = state.db.clone();
    let (limit, offset) = pagination.limit_offset();

    let (users, total) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare("SELECT * FROM users ORDER BY display_name LIMIT ?1 OFFSET ?2")
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let users: Vec<UserRow> = stmt
            .query_map([limit, offset], UserRow::from_row)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, StatusCode>((users, total))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let items = users.into_iter().map(UserView::from).collect();
    Ok(Json(Page::new(items, total, &pagination)))
}

/// GET /api/users/me — the caller's own profile.
pub async fn me(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UserView>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.query_row("SELECT * FROM users WHERE id = ?1", [&user_id], UserRow::from_row)
            .map_err(|_| StatusCode::NOT_FOUND)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(UserView::from(user)))
}
