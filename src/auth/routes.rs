//! Registration and login endpoints.
//!
//! The first registered user becomes the server admin; everyone after that
//! is a regular member.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{jwt, password};
use crate::db::models::UserRow;
use crate::state::AppState;
use crate::users::UserView;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserView,
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), StatusCode> {
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') || body.display_name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if body.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let (salt, hash) = password::hash_password(&body.password);
    let display_name = body.display_name.trim().to_string();

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let existing: i64 = conn
            .query_row("SELECT COUNT(*) FROM users WHERE email = ?1", [&email], |row| {
                row.get(0)
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if existing > 0 {
            return Err(StatusCode::CONFLICT);
        }

        // First user on a fresh server becomes the admin
        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let role = if total == 0 { "admin" } else { "member" };

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (id, email, display_name, password_salt, password_hash, role, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            rusqlite::params![id, email, display_name, salt, hash, role, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        conn.query_row("SELECT * FROM users WHERE id = ?1", [&id], UserRow::from_row)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let token = jwt::issue_access_token(&state.jwt_secret, &user.id, &user.display_name, &user.role)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to issue access token");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    tracing::info!(user_id = %user.id, role = %user.role, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: UserView::from(user),
        }),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, StatusCode> {
    let email = body.email.trim().to_lowercase();

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.query_row("SELECT * FROM users WHERE email = ?1", [&email], UserRow::from_row)
            .map_err(|_| StatusCode::UNAUTHORIZED)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    if !password::verify_password(&user.password_salt, &user.password_hash, &body.password) {
        tracing::warn!(user_id = %user.id, "Login failed: bad password");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let token = jwt::issue_access_token(&state.jwt_secret, &user.id, &user.display_name, &user.role)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to issue access token");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(AuthResponse {
        token,
        user: UserView::from(user),
    }))
}
