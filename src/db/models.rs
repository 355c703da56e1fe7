//! Database row types for all tables.
//! These correspond 1:1 to the SQLite schema defined in migrations.rs.

use rusqlite::Row;

/// User record in the users table
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub password_salt: Vec<u8>,
    pub password_hash: Vec<u8>,
    pub role: String,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    pub fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            email: row.get("email")?,
            display_name: row.get("display_name")?,
            password_salt: row.get("password_salt")?,
            password_hash: row.get("password_hash")?,
            role: row.get("role")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Project record
#[derive(Debug, Clone)]
pub struct ProjectRow {
    pub id: String,
    pub number: i64,
    pub name: String,
    pub description: String,
    pub owner_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectRow {
    pub fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            number: row.get("number")?,
            name: row.get("name")?,
            description: row.get("description")?,
            owner_id: row.get("owner_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Task record
#[derive(Debug, Clone)]
pub struct TaskRow {
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

impl TaskRow {
    pub fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            number: row.get("number")?,
            project_id: row.get("project_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            status: row.get("status")?,
            priority: row.get("priority")?,
            assignee_id: row.get("assignee_id")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Notification record (durable; only ever mutated by the is_read flip)
#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: String,
    pub recipient_id: String,
    pub kind: String,
    pub message: String,
    pub related_task_id: Option<String>,
    pub related_project_id: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

impl NotificationRow {
    pub fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            recipient_id: row.get("recipient_id")?,
            kind: row.get("kind")?,
            message: row.get("message")?,
            related_task_id: row.get("related_task_id")?,
            related_project_id: row.get("related_project_id")?,
            is_read: row.get("is_read")?,
            created_at: row.get("created_at")?,
        })
    }
}
