//! Project CRUD and membership endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::models::ProjectRow;
use crate::db::next_sequence;
use crate::fanout::{self, Mutation};
use crate::pagination::{Page, Pagination};
use crate::state::AppState;
use crate::users::UserView;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectView {
    pub id: String,
    pub number: i64,
    pub name: String,
    pub description: String,
    pub owner_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ProjectRow> for ProjectView {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            number: row.number,
            name: row.name,
            description: row.description,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: ProjectView,
    pub members: Vec<UserView>,
}

/// Whether a user may see a project (owner, member, or admin). Shared by
/// the REST handlers and the WebSocket room-join path.
pub fn visible_to(
    conn: &Connection,
    project_id: &str,
    user_id: &str,
    is_admin: bool,
) -> Result<bool, rusqlite::Error> {
    if is_admin {
        return Ok(true);
    }
    let visible: i64 = conn.query_row(
        "SELECT COUNT(*) FROM projects p
         WHERE p.id = ?1
           AND (p.owner_id = ?2
                OR EXISTS (SELECT 1 FROM project_members m
                           WHERE m.project_id = p.id AND m.user_id = ?2))",
        [project_id, user_id],
        |row| row.get(0),
    )?;
    Ok(visible > 0)
}

/// Load a project and verify the caller can see it (member, owner, or
/// admin). Shared by every project-scoped handler.
pub fn load_for_member(
    conn: &Connection,
    project_id: &str,
    claims: &Claims,
) -> Result<ProjectRow, StatusCode> {
    let project = conn
        .query_row(
            "SELECT * FROM projects WHERE id = ?1",
            [project_id],
            ProjectRow::from_row,
        )
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let visible = visible_to(conn, project_id, &claims.sub, claims.is_admin())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !visible {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(project)
}

fn load_for_owner(
    conn: &Connection,
    project_id: &str,
    claims: &Claims,
) -> Result<ProjectRow, StatusCode> {
    let project = load_for_member(conn, project_id, claims)?;
    if !claims.is_admin() && project.owner_id != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(project)
}

/// GET /api/projects — projects the caller belongs to (admins see all).
pub async fn list_projects(
    State(state): State<AppState>,
    claims: Claims,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<ProjectView>>, StatusCode> {
    let db = state.db.clone();
    let (limit, offset) = pagination.limit_offset();
    let user_id = claims.sub.clone();
    let admin = claims.is_admin();

    let (projects, total) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let (total, rows) = if admin {
            let total: i64 = conn
                .query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            let mut stmt = conn
                .prepare("SELECT * FROM projects ORDER BY number LIMIT ?1 OFFSET ?2")
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            let rows: Vec<ProjectRow> = stmt
                .query_map(rusqlite::params![limit, offset], ProjectRow::from_row)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
                .filter_map(|r| r.ok())
                .collect();
            (total, rows)
        } else {
            let total: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM projects p
                     WHERE p.owner_id = ?1
                        OR EXISTS (SELECT 1 FROM project_members m
                                   WHERE m.project_id = p.id AND m.user_id = ?1)",
                    [&user_id],
                    |row| row.get(0),
                )
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM projects p
                     WHERE p.owner_id = ?1
                        OR EXISTS (SELECT 1 FROM project_members m
                                   WHERE m.project_id = p.id AND m.user_id = ?1)
                     ORDER BY p.number LIMIT ?2 OFFSET ?3",
                )
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            let rows: Vec<ProjectRow> = stmt
                .query_map(rusqlite::params![user_id, limit, offset], ProjectRow::from_row)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
                .filter_map(|r| r.ok())
                .collect();
            (total, rows)
        };

        Ok::<_, StatusCode>((rows, total))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let items = projects.into_iter().map(ProjectView::from).collect();
    Ok(Json(Page::new(items, total, &pagination)))
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// POST /api/projects — create a project; the creator becomes owner and
/// first member, and the project gets the next sequential number.
pub async fn create_project(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectView>), StatusCode> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let owner_id = claims.sub.clone();
    let description = body.description;

    let project = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let number =
            next_sequence(&conn, "projects").map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO projects (id, number, name, description, owner_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![id, number, name, description, owner_id, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.execute(
            "INSERT INTO project_members (project_id, user_id, added_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, owner_id, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        conn.query_row("SELECT * FROM projects WHERE id = ?1", [&id], ProjectRow::from_row)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    tracing::info!(project_id = %project.id, number = project.number, "Project created");
    Ok((StatusCode::CREATED, Json(ProjectView::from(project))))
}

/// GET /api/projects/{id} — project with its member list.
pub async fn get_project(
    State(state): State<AppState>,
    claims: Claims,
    Path(project_id): Path<String>,
) -> Result<Json<ProjectDetail>, StatusCode> {
    let db = state.db.clone();

    let (project, members) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let project = load_for_member(&conn, &project_id, &claims)?;

        let mut stmt = conn
            .prepare(
                "SELECT u.* FROM users u
                 JOIN project_members m ON m.user_id = u.id
                 WHERE m.project_id = ?1
                 ORDER BY u.display_name",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let members: Vec<_> = stmt
            .query_map([&project_id], crate::db::models::UserRow::from_row)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, StatusCode>((project, members))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(ProjectDetail {
        project: ProjectView::from(project),
        members: members.into_iter().map(UserView::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// PUT /api/projects/{id} — rename/re-describe. Owner or admin only.
pub async fn update_project(
    State(state): State<AppState>,
    claims: Claims,
    Path(project_id): Path<String>,
    Json(body): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectView>, StatusCode> {
    if let Some(name) = &body.name {
        if name.trim().is_empty() {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    let db = state.db.clone();
    let project = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let project = load_for_owner(&conn, &project_id, &claims)?;

        let name = body.name.map(|n| n.trim().to_string()).unwrap_or(project.name);
        let description = body.description.unwrap_or(project.description);
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "UPDATE projects SET name = ?1, description = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![name, description, now, project_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        conn.query_row("SELECT * FROM projects WHERE id = ?1", [&project_id], ProjectRow::from_row)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(ProjectView::from(project)))
}

/// DELETE /api/projects/{id} — owner or admin only. Cascades to tasks,
/// comments, and memberships.
pub async fn delete_project(
    State(state): State<AppState>,
    claims: Claims,
    Path(project_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        load_for_owner(&conn, &project_id, &claims)?;
        conn.execute("DELETE FROM projects WHERE id = ?1", [&project_id])
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<_, StatusCode>(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: String,
}

/// POST /api/projects/{id}/members — add a member (owner or admin only).
/// The new member gets a durable `project_added` notification, pushed to
/// their personal room if they are online.
pub async fn add_member(
    State(state): State<AppState>,
    claims: Claims,
    Path(project_id): Path<String>,
    Json(body): Json<AddMemberRequest>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    let new_member = body.user_id.clone();
    let path_project = project_id.clone();

    let (project, added) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let project = load_for_owner(&conn, &path_project, &claims)?;

        let user_exists: i64 = conn
            .query_row("SELECT COUNT(*) FROM users WHERE id = ?1", [&new_member], |row| {
                row.get(0)
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if user_exists == 0 {
            return Err(StatusCode::NOT_FOUND);
        }

        let now = Utc::now().to_rfc3339();
        let added = conn
            .execute(
                "INSERT OR IGNORE INTO project_members (project_id, user_id, added_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![path_project, new_member, now],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<_, StatusCode>((project, added > 0))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    // Fan-out is best-effort: the membership write has committed, so a
    // delivery failure must not fail this response.
    if added {
        let mutation = Mutation::ProjectMemberAdded {
            project_id,
            project_name: project.name,
            user_id: body.user_id,
        };
        if let Err(e) = fanout::dispatch(&state, mutation).await {
            tracing::warn!(error = %e, "Membership fan-out failed");
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/projects/{id}/members/{user_id} — owner or admin only.
pub async fn remove_member(
    State(state): State<AppState>,
    claims: Claims,
    Path((project_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let project = load_for_owner(&conn, &project_id, &claims)?;
        if user_id == project.owner_id {
            // The owner cannot be removed from their own project
            return Err(StatusCode::BAD_REQUEST);
        }
        conn.execute(
            "DELETE FROM project_members WHERE project_id = ?1 AND user_id = ?2",
            [&project_id, &user_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<_, StatusCode>(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(StatusCode::NO_CONTENT)
}
