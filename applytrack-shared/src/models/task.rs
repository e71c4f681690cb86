/// To-do items, optionally tied to an application
///
/// # Lifecycle
///
/// ```text
/// open ──complete──▶ completed
///  ▲                    │
///  └──────reopen────────┘
/// ```
///
/// Moving the due date clears `reminder_sent_at`; reopening does too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::application::Priority;
use super::Pagination;

const COLUMNS: &str = "id, user_id, application_id, title, description, due_at, priority, \
     completed_at, reminder_sent_at, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub application_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub completed_at: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_completed() && self.due_at.map_or(false, |due| due < now)
    }
}

#[derive(Debug, Clone)]
pub struct CreateTask {
    pub application_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub priority: Priority,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTask {
    pub application_id: Option<Option<Uuid>>,
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub due_at: Option<Option<DateTime<Utc>>>,
    pub priority: Option<Priority>,
}

/// Completion filter for lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Open,
    Completed,
    Overdue,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub application_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
}

/// Task due for a reminder email
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskReminder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub title: String,
    pub due_at: DateTime<Utc>,
    pub company: Option<String>,
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, user_id: Uuid, filter: &TaskFilter) {
    query
        .push(" WHERE user_id = ")
        .push_bind(user_id)
        .push(" AND deleted_at IS NULL");

    if let Some(application_id) = filter.application_id {
        query.push(" AND application_id = ").push_bind(application_id);
    }
    match filter.status {
        Some(TaskStatus::Open) => {
            query.push(" AND completed_at IS NULL");
        }
        Some(TaskStatus::Completed) => {
            query.push(" AND completed_at IS NOT NULL");
        }
        Some(TaskStatus::Overdue) => {
            query.push(" AND completed_at IS NULL AND due_at < NOW()");
        }
        None => {}
    }
    if let Some(priority) = filter.priority {
        query.push(" AND priority = ").push_bind(priority);
    }
}

impl Task {
    pub async fn create(pool: &PgPool, user_id: Uuid, data: CreateTask) -> Result<Self, sqlx::Error> {
        let sql = format!(
            "INSERT INTO tasks (user_id, application_id, title, description, due_at, priority) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, Task>(&sql)
            .bind(user_id)
            .bind(data.application_id)
            .bind(data.title)
            .bind(data.description)
            .bind(data.due_at)
            .bind(data.priority)
            .fetch_one(pool)
            .await
    }

    pub async fn find(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
            COLUMNS
        );

        sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Lists tasks: open before completed, then by due date
    pub async fn list(
        pool: &PgPool,
        user_id: Uuid,
        filter: &TaskFilter,
        pagination: Pagination,
    ) -> Result<(Vec<Self>, i64), sqlx::Error> {
        let mut query = QueryBuilder::new(format!("SELECT {} FROM tasks", COLUMNS));
        push_filters(&mut query, user_id, filter);
        query
            .push(" ORDER BY completed_at IS NOT NULL, due_at NULLS LAST, created_at DESC LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());
        let items = query.build_query_as::<Task>().fetch_all(pool).await?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM tasks");
        push_filters(&mut count, user_id, filter);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        Ok((items, total))
    }

    pub async fn update(
        pool: &PgPool,
        user_id: Uuid,
        id: Uuid,
        data: UpdateTask,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query = QueryBuilder::new("UPDATE tasks SET updated_at = NOW()");

        if let Some(application_id) = data.application_id {
            query.push(", application_id = ").push_bind(application_id);
        }
        if let Some(title) = data.title {
            query.push(", title = ").push_bind(title);
        }
        if let Some(description) = data.description {
            query.push(", description = ").push_bind(description);
        }
        if let Some(due_at) = data.due_at {
            query
                .push(", reminder_sent_at = CASE WHEN due_at IS NOT DISTINCT FROM ")
                .push_bind(due_at)
                .push(" THEN reminder_sent_at ELSE NULL END, due_at = ")
                .push_bind(due_at);
        }
        if let Some(priority) = data.priority {
            query.push(", priority = ").push_bind(priority);
        }

        query
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND user_id = ")
            .push_bind(user_id)
            .push(" AND deleted_at IS NULL RETURNING ")
            .push(COLUMNS);

        query.build_query_as::<Task>().fetch_optional(pool).await
    }

    /// Marks the task done (idempotent, keeps the first completion time)
    pub async fn complete(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            "UPDATE tasks SET completed_at = COALESCE(completed_at, NOW()), updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn reopen(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            "UPDATE tasks SET completed_at = NULL, reminder_sent_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn soft_delete(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Open tasks whose due date falls in the user's reminder window
    pub async fn due_for_reminder(pool: &PgPool, limit: i64) -> Result<Vec<TaskReminder>, sqlx::Error> {
        sqlx::query_as::<_, TaskReminder>(
            r#"
            SELECT t.id, t.user_id, u.email, u.name, t.title, t.due_at, a.company
            FROM tasks t
            JOIN users u ON u.id = t.user_id AND u.deleted_at IS NULL
            LEFT JOIN job_applications a ON a.id = t.application_id AND a.deleted_at IS NULL
            LEFT JOIN email_preferences p ON p.user_id = t.user_id
            WHERE t.deleted_at IS NULL
              AND t.completed_at IS NULL
              AND t.reminder_sent_at IS NULL
              AND t.due_at IS NOT NULL
              AND COALESCE(p.task_reminders, TRUE)
              AND t.due_at > NOW()
              AND t.due_at <= NOW() + make_interval(hours => COALESCE(p.reminder_lead_hours, 24))
            ORDER BY t.due_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn mark_reminded(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET reminder_sent_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            application_id: None,
            title: "Send thank-you note".to_string(),
            description: None,
            due_at: Some(now - Duration::hours(1)),
            priority: Priority::High,
            completed_at: None,
            reminder_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_overdue() {
        let now = Utc::now();
        let mut task = sample();
        assert!(task.is_overdue(now));

        task.completed_at = Some(now);
        assert!(!task.is_overdue(now));

        task.completed_at = None;
        task.due_at = None;
        assert!(!task.is_overdue(now));
    }

    #[test]
    fn test_status_filter_sql() {
        let filter = TaskFilter {
            status: Some(TaskStatus::Overdue),
            priority: Some(Priority::High),
            ..Default::default()
        };
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM tasks");
        push_filters(&mut query, Uuid::new_v4(), &filter);

        let sql = query.sql();
        assert!(sql.contains("completed_at IS NULL AND due_at < NOW()"));
        assert!(sql.contains("priority = $2"));
    }

    #[test]
    fn test_status_deserialize() {
        let status: TaskStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(status, TaskStatus::Completed);
    }
}
