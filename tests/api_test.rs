//! Integration tests for auth, project/task/comment CRUD, pagination,
//! permissions, and the pull-based notification listing.

use std::net::SocketAddr;

use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Helper: start the server on a random port and return its base URL.
async fn start_test_server() -> String {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = teamboard_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = teamboard_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = teamboard_server::state::AppState::new(db, jwt_secret);
    let app = teamboard_server::routes::build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    format!("http://{}", addr)
}

/// Register a user and return (access_token, user_id).
async fn register_user(base_url: &str, name: &str) -> (String, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&json!({
            "email": format!("{}@example.com", name.to_lowercase()),
            "displayName": name,
            "password": "correct horse battery",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "Registration failed for {}", name);

    let body: Value = resp.json().await.unwrap();
    (
        body["token"].as_str().unwrap().to_string(),
        body["user"]["id"].as_str().unwrap().to_string(),
    )
}

async fn create_project(base_url: &str, token: &str, name: &str) -> Value {
    reqwest::Client::new()
        .post(format!("{}/api/projects", base_url))
        .bearer_auth(token)
        .json(&json!({"name": name}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn register_login_and_me() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    let (token, user_id) = register_user(&base_url, "Ada").await;

    // First registered user becomes admin
    let me: Value = client
        .get(format!("{}/api/users/me", base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["id"], user_id.as_str());
    assert_eq!(me["email"], "ada@example.com");
    assert_eq!(me["role"], "admin");

    // Duplicate email is a conflict
    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&json!({
            "email": "ada@example.com",
            "displayName": "Ada Again",
            "password": "correct horse battery",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    // Login with the right password
    let resp = client
        .post(format!("{}/api/auth/login", base_url))
        .json(&json!({"email": "ada@example.com", "password": "correct horse battery"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Wrong password is unauthorized
    let resp = client
        .post(format!("{}/api/auth/login", base_url))
        .json(&json!({"email": "ada@example.com", "password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // No token at all
    let resp = client
        .get(format!("{}/api/users/me", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn user_listing_is_admin_only() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    let (token_admin, _) = register_user(&base_url, "Ada").await;
    let (token_member, _) = register_user(&base_url, "Bob").await;

    // Second registered user is a plain member
    let resp = client
        .get(format!("{}/api/users", base_url))
        .bearer_auth(&token_member)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let listing: Value = client
        .get(format!("{}/api/users", base_url))
        .bearer_auth(&token_admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["total"], 2);
}

#[tokio::test]
async fn project_membership_gates_visibility() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    let (token_owner, _) = register_user(&base_url, "Owner").await;
    let (token_bob, bob_id) = register_user(&base_url, "Bob").await;

    let project = create_project(&base_url, &token_owner, "Apollo").await;
    let project_id = project["id"].as_str().unwrap();
    assert_eq!(project["number"], 1);

    // Bob is not a member yet
    let resp = client
        .get(format!("{}/api/projects/{}", base_url, project_id))
        .bearer_auth(&token_bob)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let listing: Value = client
        .get(format!("{}/api/projects", base_url))
        .bearer_auth(&token_bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["total"], 0);

    // Owner adds Bob; now he sees it, including the member list
    let resp = client
        .post(format!("{}/api/projects/{}/members", base_url, project_id))
        .bearer_auth(&token_owner)
        .json(&json!({"userId": bob_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let detail: Value = client
        .get(format!("{}/api/projects/{}", base_url, project_id))
        .bearer_auth(&token_bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["name"], "Apollo");
    assert_eq!(detail["members"].as_array().unwrap().len(), 2);

    // Bob cannot delete someone else's project
    let resp = client
        .delete(format!("{}/api/projects/{}", base_url, project_id))
        .bearer_auth(&token_bob)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // The owner can
    let resp = client
        .delete(format!("{}/api/projects/{}", base_url, project_id))
        .bearer_auth(&token_owner)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn task_lifecycle_and_durable_notifications() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    let (token_owner, _) = register_user(&base_url, "Owner").await;
    let (token_bob, bob_id) = register_user(&base_url, "Bob").await;

    let project = create_project(&base_url, &token_owner, "Apollo").await;
    let project_id = project["id"].as_str().unwrap();
    client
        .post(format!("{}/api/projects/{}/members", base_url, project_id))
        .bearer_auth(&token_owner)
        .json(&json!({"userId": bob_id}))
        .send()
        .await
        .unwrap();

    // Create a task assigned to Bob
    let resp = client
        .post(format!("{}/api/projects/{}/tasks", base_url, project_id))
        .bearer_auth(&token_owner)
        .json(&json!({"title": "Fix login", "assigneeId": bob_id, "priority": "high"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let task: Value = resp.json().await.unwrap();
    let task_id = task["id"].as_str().unwrap();
    assert_eq!(task["number"], 1);
    assert_eq!(task["status"], "todo");
    assert_eq!(task["assigneeId"], bob_id.as_str());

    // Bob's notification list has the durable task_assigned record
    // (membership produced a project_added one first; newest first ordering)
    let notifications: Value = client
        .get(format!("{}/api/notifications", base_url))
        .bearer_auth(&token_bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(notifications["total"], 2);
    let items = notifications["items"].as_array().unwrap();
    let assigned = items
        .iter()
        .find(|n| n["type"] == "task_assigned")
        .expect("missing task_assigned notification");
    assert_eq!(assigned["relatedTaskId"], task_id);
    assert_eq!(assigned["relatedProjectId"], project_id);
    assert_eq!(assigned["isRead"], false);

    // Mark one read, then all
    let notification_id = assigned["id"].as_str().unwrap();
    let resp = client
        .post(format!("{}/api/notifications/{}/read", base_url, notification_id))
        .bearer_auth(&token_bob)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let read_all: Value = client
        .post(format!("{}/api/notifications/read-all", base_url))
        .bearer_auth(&token_bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(read_all["updated"], 1);

    // The owner cannot read Bob's notification
    let resp = client
        .post(format!("{}/api/notifications/{}/read", base_url, notification_id))
        .bearer_auth(&token_owner)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Status update and re-read
    let resp = client
        .put(format!("{}/api/tasks/{}", base_url, task_id))
        .bearer_auth(&token_bob)
        .json(&json!({"status": "done"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["status"], "done");

    // Unassign via explicit null
    let resp = client
        .put(format!("{}/api/tasks/{}", base_url, task_id))
        .bearer_auth(&token_owner)
        .json(&json!({"assigneeId": null}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let unassigned: Value = resp.json().await.unwrap();
    assert!(unassigned["assigneeId"].is_null());

    // Status filter
    let done: Value = client
        .get(format!(
            "{}/api/projects/{}/tasks?status=done",
            base_url, project_id
        ))
        .bearer_auth(&token_owner)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(done["total"], 1);

    // Comments
    let resp = client
        .post(format!("{}/api/tasks/{}/comments", base_url, task_id))
        .bearer_auth(&token_bob)
        .json(&json!({"body": "shipped"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let comments: Value = client
        .get(format!("{}/api/tasks/{}/comments", base_url, task_id))
        .bearer_auth(&token_owner)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(comments["total"], 1);
    assert_eq!(comments["items"][0]["body"], "shipped");
    assert_eq!(comments["items"][0]["authorName"], "Bob");
}

#[tokio::test]
async fn validation_rejects_bad_input() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    let (token, _) = register_user(&base_url, "Ada").await;
    let project = create_project(&base_url, &token, "Apollo").await;
    let project_id = project["id"].as_str().unwrap();

    // Empty task title
    let resp = client
        .post(format!("{}/api/projects/{}/tasks", base_url, project_id))
        .bearer_auth(&token)
        .json(&json!({"title": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Unknown priority
    let resp = client
        .post(format!("{}/api/projects/{}/tasks", base_url, project_id))
        .bearer_auth(&token)
        .json(&json!({"title": "ok", "priority": "urgent"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Unknown status filter
    let resp = client
        .get(format!(
            "{}/api/projects/{}/tasks?status=blocked",
            base_url, project_id
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Assignee outside the project
    let resp = client
        .post(format!("{}/api/projects/{}/tasks", base_url, project_id))
        .bearer_auth(&token)
        .json(&json!({"title": "ok", "assigneeId": "no-such-user"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Empty project name
    let resp = client
        .post(format!("{}/api/projects", base_url))
        .bearer_auth(&token)
        .json(&json!({"name": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Short password
    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&json!({
            "email": "short@example.com",
            "displayName": "Shorty",
            "password": "short",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
