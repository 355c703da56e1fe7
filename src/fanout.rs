//! Notification fan-out: turns a committed domain mutation into at most one
//! durable notification and/or one room broadcast.
//!
//! `plan` is the pure rule table; `dispatch` executes a plan (persist, then
//! publish). Callers invoke `dispatch` after their own write has committed
//! and log-and-swallow its error: real-time delivery is best-effort and must
//! never fail the HTTP response of the triggering request.
//!
//! Only task assignment and project membership produce durable records;
//! status changes and comments are transient broadcasts.

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::comments::CommentView;
use crate::db::models::NotificationRow;
use crate::db::DbPool;
use crate::notifications::NotificationView;
use crate::realtime::events::ServerEvent;
use crate::realtime::rooms::PublishError;
use crate::realtime::Topic;
use crate::state::AppState;
use crate::tasks::TaskView;

/// A domain mutation that already committed to the store.
#[derive(Debug, Clone)]
pub enum Mutation {
    TaskAssigned { task: TaskView, assignee_id: String },
    TaskStatusChanged { task: TaskView },
    CommentAdded { project_id: String, comment: CommentView },
    ProjectMemberAdded {
        project_id: String,
        project_name: String,
        user_id: String,
    },
}

/// Durable notification to persist and then push to the recipient's
/// personal room.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: String,
    pub kind: &'static str,
    pub message: String,
    pub related_task_id: Option<String>,
    pub related_project_id: Option<String>,
}

/// What a mutation fans out to.
#[derive(Debug, Clone)]
pub enum FanoutPlan {
    /// Persist a notification, then emit `notification:new` to
    /// `user:<recipient>`.
    Notify(NewNotification),
    /// Transient broadcast only, nothing persisted.
    Broadcast { topic: Topic, event: ServerEvent },
}

/// The rule table. Pure: no I/O, fully unit-testable.
pub fn plan(mutation: Mutation) -> FanoutPlan {
    match mutation {
        Mutation::TaskAssigned { task, assignee_id } => FanoutPlan::Notify(NewNotification {
            recipient_id: assignee_id,
            kind: "task_assigned",
            message: format!("You were assigned task #{}: {}", task.number, task.title),
            related_task_id: Some(task.id),
            related_project_id: Some(task.project_id),
        }),
        Mutation::TaskStatusChanged { task } => FanoutPlan::Broadcast {
            topic: Topic::project(task.project_id.clone()),
            event: ServerEvent::TaskUpdated(task),
        },
        Mutation::CommentAdded { project_id, comment } => FanoutPlan::Broadcast {
            topic: Topic::project(project_id),
            event: ServerEvent::CommentNew(comment),
        },
        Mutation::ProjectMemberAdded {
            project_id,
            project_name,
            user_id,
        } => FanoutPlan::Notify(NewNotification {
            recipient_id: user_id,
            kind: "project_added",
            message: format!("You were added to project {project_name}"),
            related_task_id: None,
            related_project_id: Some(project_id),
        }),
    }
}

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("failed to persist notification: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("store lock poisoned")]
    Lock,
}

/// Execute a mutation's fan-out plan.
pub async fn dispatch(state: &AppState, mutation: Mutation) -> Result<(), FanoutError> {
    match plan(mutation) {
        FanoutPlan::Broadcast { topic, event } => {
            let delivered = state.rooms.publish(&topic, &event, None)?;
            tracing::debug!(topic = %topic, delivered, "Fan-out broadcast");
            Ok(())
        }
        FanoutPlan::Notify(notification) => {
            let db = state.db.clone();
            let to_insert = notification.clone();
            let row = tokio::task::spawn_blocking(move || insert_notification(&db, &to_insert))
                .await??;

            let topic = Topic::user(&row.recipient_id);
            let event = ServerEvent::NotificationNew(NotificationView::from(row));
            let delivered = state.rooms.publish(&topic, &event, None)?;
            tracing::debug!(topic = %topic, delivered, "Fan-out notification");
            Ok(())
        }
    }
}

fn insert_notification(db: &DbPool, n: &NewNotification) -> Result<NotificationRow, FanoutError> {
    let conn = db.lock().map_err(|_| FanoutError::Lock)?;
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO notifications (id, recipient_id, kind, message, related_task_id, related_project_id, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        rusqlite::params![
            id,
            n.recipient_id,
            n.kind,
            n.message,
            n.related_task_id,
            n.related_project_id,
            now
        ],
    )?;

    Ok(NotificationRow {
        id,
        recipient_id: n.recipient_id.clone(),
        kind: n.kind.to_string(),
        message: n.message.clone(),
        related_task_id: n.related_task_id.clone(),
        related_project_id: n.related_project_id.clone(),
        is_read: false,
        created_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> TaskView {
        TaskView {
            id: "t-1".into(),
            number: 7,
            project_id: "p-1".into(),
            title: "Fix login".into(),
            description: String::new(),
            status: "in_progress".into(),
            priority: "high".into(),
            assignee_id: Some("u-2".into()),
            created_by: "u-1".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-02T00:00:00Z".into(),
        }
    }

    #[test]
    fn assignment_persists_and_targets_personal_room() {
        let plan = plan(Mutation::TaskAssigned {
            task: task(),
            assignee_id: "u-2".into(),
        });

        let FanoutPlan::Notify(n) = plan else {
            panic!("assignment must produce a durable notification");
        };
        assert_eq!(n.recipient_id, "u-2");
        assert_eq!(n.kind, "task_assigned");
        assert_eq!(n.related_task_id.as_deref(), Some("t-1"));
        assert_eq!(n.related_project_id.as_deref(), Some("p-1"));
        assert!(n.message.contains("#7"));
        assert!(n.message.contains("Fix login"));
    }

    #[test]
    fn status_change_is_broadcast_only() {
        let plan = plan(Mutation::TaskStatusChanged { task: task() });

        let FanoutPlan::Broadcast { topic, event } = plan else {
            panic!("status change must not persist anything");
        };
        assert_eq!(topic, Topic::project("p-1"));
        assert!(matches!(event, ServerEvent::TaskUpdated(t) if t.id == "t-1"));
    }

    #[test]
    fn comment_is_broadcast_to_the_project_room() {
        let comment = CommentView {
            id: "c-1".into(),
            task_id: "t-1".into(),
            author_id: "u-1".into(),
            author_name: "Ada".into(),
            body: "looks good".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        let plan = plan(Mutation::CommentAdded {
            project_id: "p-1".into(),
            comment,
        });

        let FanoutPlan::Broadcast { topic, event } = plan else {
            panic!("comments must not persist notifications");
        };
        assert_eq!(topic, Topic::project("p-1"));
        assert!(matches!(event, ServerEvent::CommentNew(c) if c.id == "c-1"));
    }

    #[test]
    fn membership_produces_project_added_notification() {
        let plan = plan(Mutation::ProjectMemberAdded {
            project_id: "p-1".into(),
            project_name: "Apollo".into(),
            user_id: "u-9".into(),
        });

        let FanoutPlan::Notify(n) = plan else {
            panic!("membership must produce a durable notification");
        };
        assert_eq!(n.kind, "project_added");
        assert_eq!(n.recipient_id, "u-9");
        assert!(n.message.contains("Apollo"));
        assert!(n.related_task_id.is_none());
    }
}
