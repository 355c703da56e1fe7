//! Task CRUD endpoints.
//!
//! Writes that assign a task or move its status call the fan-out rule set
//! after the row has committed; fan-out failures are logged and never
//! surface to the HTTP caller.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::models::{ProjectRow, TaskRow};
use crate::db::next_sequence;
use crate::fanout::{self, Mutation};
use crate::pagination::{Page, Pagination};
use crate::projects;
use crate::state::AppState;

const STATUSES: [&str; 3] = ["todo", "in_progress", "done"];
const PRIORITIES: [&str; 3] = ["low", "medium", "high"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: String,
    pub number: i64,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub assignee_id: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<TaskRow> for TaskView {
    fn from(row: TaskRow) -> Self {
        Self {
            id: row.id,
            number: row.number,
            project_id: row.project_id,
            title: row.title,
            description: row.description,
            status: row.status,
            priority: row.priority,
            assignee_id: row.assignee_id,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Load a task and verify the caller can see its project.
fn load_for_member(
    conn: &Connection,
    task_id: &str,
    claims: &Claims,
) -> Result<(TaskRow, ProjectRow), StatusCode> {
    let task = conn
        .query_row("SELECT * FROM tasks WHERE id = ?1", [task_id], TaskRow::from_row)
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let project = projects::load_for_member(conn, &task.project_id, claims)?;
    Ok((task, project))
}

#[derive(Debug, Deserialize)]
pub struct TaskFilter {
    pub status: Option<String>,
    pub assignee: Option<String>,
}

/// GET /api/projects/{id}/tasks — paginated, optionally filtered by
/// `?status=` and `?assignee=`.
pub async fn list_tasks(
    State(state): State<AppState>,
    claims: Claims,
    Path(project_id): Path<String>,
    Query(filter): Query<TaskFilter>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<TaskView>>, StatusCode> {
    if let Some(status) = &filter.status {
        if !STATUSES.contains(&status.as_str()) {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    let db = state.db.clone();
    let (limit, offset) = pagination.limit_offset();

    let (tasks, total) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        projects::load_for_member(&conn, &project_id, &claims)?;

        // Filters collapse to always-true clauses when absent
        let total: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tasks
                 WHERE project_id = ?1
                   AND (?2 IS NULL OR status = ?2)
                   AND (?3 IS NULL OR assignee_id = ?3)",
                rusqlite::params![project_id, filter.status, filter.assignee],
                |row| row.get(0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare(
                "SELECT * FROM tasks
                 WHERE project_id = ?1
                   AND (?2 IS NULL OR status = ?2)
                   AND (?3 IS NULL OR assignee_id = ?3)
                 ORDER BY number LIMIT ?4 OFFSET ?5",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let tasks: Vec<TaskRow> = stmt
            .query_map(
                rusqlite::params![project_id, filter.status, filter.assignee, limit, offset],
                TaskRow::from_row,
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, StatusCode>((tasks, total))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let items = tasks.into_iter().map(TaskView::from).collect();
    Ok(Json(Page::new(items, total, &pagination)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: Option<String>,
    pub assignee_id: Option<String>,
}

/// POST /api/projects/{id}/tasks
pub async fn create_task(
    State(state): State<AppState>,
    claims: Claims,
    Path(project_id): Path<String>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskView>), StatusCode> {
    let title = body.title.trim().to_string();
    if title.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let priority = body.priority.unwrap_or_else(|| "medium".to_string());
    if !PRIORITIES.contains(&priority.as_str()) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let creator = claims.sub.clone();
    let assignee = body.assignee_id.clone();
    let claims_for_db = claims.clone();
    let project_for_db = project_id.clone();
    let description = body.description;

    let task = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        projects::load_for_member(&conn, &project_for_db, &claims_for_db)?;

        if let Some(assignee) = &assignee {
            ensure_is_member(&conn, &project_for_db, assignee)?;
        }

        let number = next_sequence(&conn, "tasks").map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO tasks (id, number, project_id, title, description, status, priority, assignee_id, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'todo', ?6, ?7, ?8, ?9, ?9)",
            rusqlite::params![id, number, project_for_db, title, description, priority, assignee, creator, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        conn.query_row("SELECT * FROM tasks WHERE id = ?1", [&id], TaskRow::from_row)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let view = TaskView::from(task);
    if let Some(assignee_id) = view.assignee_id.clone() {
        let mutation = Mutation::TaskAssigned {
            task: view.clone(),
            assignee_id,
        };
        if let Err(e) = fanout::dispatch(&state, mutation).await {
            tracing::warn!(task_id = %view.id, error = %e, "Assignment fan-out failed");
        }
    }

    tracing::info!(task_id = %view.id, number = view.number, "Task created");
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    claims: Claims,
    Path(task_id): Path<String>,
) -> Result<Json<TaskView>, StatusCode> {
    let db = state.db.clone();
    let (task, _) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        load_for_member(&conn, &task_id, &claims)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(TaskView::from(task)))
}

/// Distinguishes "field absent" from explicit null, so `assigneeId: null`
/// unassigns while omitting the field leaves it untouched.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<String>>,
}

/// PUT /api/tasks/{id}
pub async fn update_task(
    State(state): State<AppState>,
    claims: Claims,
    Path(task_id): Path<String>,
    Json(body): Json<UpdateTaskRequest>,
) -> Result<Json<TaskView>, StatusCode> {
    if let Some(status) = &body.status {
        if !STATUSES.contains(&status.as_str()) {
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    if let Some(priority) = &body.priority {
        if !PRIORITIES.contains(&priority.as_str()) {
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    if let Some(title) = &body.title {
        if title.trim().is_empty() {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    let db = state.db.clone();
    let claims_for_db = claims.clone();
    let task_for_db = task_id.clone();

    let (before, after) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let (before, _) = load_for_member(&conn, &task_for_db, &claims_for_db)?;

        let title = body
            .title
            .map(|t| t.trim().to_string())
            .unwrap_or_else(|| before.title.clone());
        let description = body.description.unwrap_or_else(|| before.description.clone());
        let status = body.status.unwrap_or_else(|| before.status.clone());
        let priority = body.priority.unwrap_or_else(|| before.priority.clone());
        let assignee = match body.assignee_id {
            Some(new_value) => {
                if let Some(user) = &new_value {
                    ensure_is_member(&conn, &before.project_id, user)?;
                }
                new_value
            }
            None => before.assignee_id.clone(),
        };

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE tasks SET title = ?1, description = ?2, status = ?3, priority = ?4,
                              assignee_id = ?5, updated_at = ?6
             WHERE id = ?7",
            rusqlite::params![title, description, status, priority, assignee, now, task_for_db],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let after = conn
            .query_row("SELECT * FROM tasks WHERE id = ?1", [&task_for_db], TaskRow::from_row)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<_, StatusCode>((before, after))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let view = TaskView::from(after);

    // Fan-out after the committed write; errors are logged, never returned.
    if view.assignee_id.is_some() && view.assignee_id != before.assignee_id {
        let mutation = Mutation::TaskAssigned {
            task: view.clone(),
            assignee_id: view.assignee_id.clone().unwrap_or_default(),
        };
        if let Err(e) = fanout::dispatch(&state, mutation).await {
            tracing::warn!(task_id = %view.id, error = %e, "Assignment fan-out failed");
        }
    }
    if view.status != before.status {
        let mutation = Mutation::TaskStatusChanged { task: view.clone() };
        if let Err(e) = fanout::dispatch(&state, mutation).await {
            tracing::warn!(task_id = %view.id, error = %e, "Status fan-out failed");
        }
    }

    Ok(Json(view))
}

/// DELETE /api/tasks/{id} — creator, project owner, or admin.
pub async fn delete_task(
    State(state): State<AppState>,
    claims: Claims,
    Path(task_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let (task, project) = load_for_member(&conn, &task_id, &claims)?;
        if !claims.is_admin() && task.created_by != claims.sub && project.owner_id != claims.sub {
            return Err(StatusCode::FORBIDDEN);
        }
        conn.execute("DELETE FROM tasks WHERE id = ?1", [&task_id])
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<_, StatusCode>(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(StatusCode::NO_CONTENT)
}

/// An assignee must already be a member (or the owner) of the project.
fn ensure_is_member(conn: &Connection, project_id: &str, user_id: &str) -> Result<(), StatusCode> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM project_members WHERE project_id = ?1 AND user_id = ?2",
            [project_id, user_id],
            |row| row.get(0),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if count == 0 {
        let owner: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM projects WHERE id = ?1 AND owner_id = ?2",
                [project_id, user_id],
                |row| row.get(0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if owner == 0 {
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    Ok(())
}
