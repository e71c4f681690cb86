/// Interviews scheduled for an application
///
/// Rescheduling clears `reminder_sent_at` so the worker reminds again for
/// the new time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::Pagination;

const COLUMNS: &str = "id, user_id, application_id, kind, scheduled_at, duration_minutes, location, \
     interviewer, notes, outcome, reminder_sent_at, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterviewKind {
    Phone,
    Video,
    Onsite,
    Technical,
    Behavioral,
    Final,
    Other,
}

impl InterviewKind {
    pub fn label(&self) -> &'static str {
        match self {
            InterviewKind::Phone => "Phone",
            InterviewKind::Video => "Video",
            InterviewKind::Onsite => "On-site",
            InterviewKind::Technical => "Technical",
            InterviewKind::Behavioral => "Behavioral",
            InterviewKind::Final => "Final",
            InterviewKind::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Pending,
    Passed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Interview {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub application_id: Uuid,
    pub kind: InterviewKind,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
    pub location: Option<String>,
    pub interviewer: Option<String>,
    pub notes: Option<String>,
    pub outcome: Outcome,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateInterview {
    pub application_id: Uuid,
    pub kind: InterviewKind,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
    pub location: Option<String>,
    pub interviewer: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateInterview {
    pub application_id: Option<Uuid>,
    pub kind: Option<InterviewKind>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<Option<i32>>,
    pub location: Option<Option<String>>,
    pub interviewer: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Clone, Default)]
pub struct InterviewFilter {
    pub application_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
}

/// Interview due for a reminder email, joined with what the email needs
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InterviewReminder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub company: String,
    pub position: String,
    pub kind: InterviewKind,
    pub scheduled_at: DateTime<Utc>,
    pub location: Option<String>,
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, user_id: Uuid, filter: &InterviewFilter) {
    query
        .push(" WHERE user_id = ")
        .push_bind(user_id)
        .push(" AND deleted_at IS NULL");

    if let Some(application_id) = filter.application_id {
        query.push(" AND application_id = ").push_bind(application_id);
    }
    if let Some(from) = filter.from {
        query.push(" AND scheduled_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        query.push(" AND scheduled_at < ").push_bind(to);
    }
    if let Some(outcome) = filter.outcome {
        query.push(" AND outcome = ").push_bind(outcome);
    }
}

impl Interview {
    pub async fn create(pool: &PgPool, user_id: Uuid, data: CreateInterview) -> Result<Self, sqlx::Error> {
        let sql = format!(
            "INSERT INTO interviews \
             (user_id, application_id, kind, scheduled_at, duration_minutes, location, interviewer, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, Interview>(&sql)
            .bind(user_id)
            .bind(data.application_id)
            .bind(data.kind)
            .bind(data.scheduled_at)
            .bind(data.duration_minutes)
            .bind(data.location)
            .bind(data.interviewer)
            .bind(data.notes)
            .fetch_one(pool)
            .await
    }

    pub async fn find(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM interviews WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
            COLUMNS
        );

        sqlx::query_as::<_, Interview>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Lists interviews by scheduled time, earliest first
    pub async fn list(
        pool: &PgPool,
        user_id: Uuid,
        filter: &InterviewFilter,
        pagination: Pagination,
    ) -> Result<(Vec<Self>, i64), sqlx::Error> {
        let mut query = QueryBuilder::new(format!("SELECT {} FROM interviews", COLUMNS));
        push_filters(&mut query, user_id, filter);
        query
            .push(" ORDER BY scheduled_at, id LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());
        let items = query.build_query_as::<Interview>().fetch_all(pool).await?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM interviews");
        push_filters(&mut count, user_id, filter);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        Ok((items, total))
    }

    pub async fn update(
        pool: &PgPool,
        user_id: Uuid,
        id: Uuid,
        data: UpdateInterview,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query = QueryBuilder::new("UPDATE interviews SET updated_at = NOW()");

        if let Some(application_id) = data.application_id {
            query.push(", application_id = ").push_bind(application_id);
        }
        if let Some(kind) = data.kind {
            query.push(", kind = ").push_bind(kind);
        }
        if let Some(scheduled_at) = data.scheduled_at {
            query
                .push(", reminder_sent_at = CASE WHEN scheduled_at = ")
                .push_bind(scheduled_at)
                .push(" THEN reminder_sent_at ELSE NULL END, scheduled_at = ")
                .push_bind(scheduled_at);
        }
        if let Some(duration_minutes) = data.duration_minutes {
            query.push(", duration_minutes = ").push_bind(duration_minutes);
        }
        if let Some(location) = data.location {
            query.push(", location = ").push_bind(location);
        }
        if let Some(interviewer) = data.interviewer {
            query.push(", interviewer = ").push_bind(interviewer);
        }
        if let Some(notes) = data.notes {
            query.push(", notes = ").push_bind(notes);
        }
        if let Some(outcome) = data.outcome {
            query.push(", outcome = ").push_bind(outcome);
        }

        query
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND user_id = ")
            .push_bind(user_id)
            .push(" AND deleted_at IS NULL RETURNING ")
            .push(COLUMNS);

        query.build_query_as::<Interview>().fetch_optional(pool).await
    }

    pub async fn soft_delete(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE interviews SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Pending interviews inside each user's reminder window
    pub async fn due_for_reminder(pool: &PgPool, limit: i64) -> Result<Vec<InterviewReminder>, sqlx::Error> {
        sqlx::query_as::<_, InterviewReminder>(
            r#"
            SELECT i.id, i.user_id, u.email, u.name, a.company, a.position,
                   i.kind, i.scheduled_at, i.location
            FROM interviews i
            JOIN users u ON u.id = i.user_id AND u.deleted_at IS NULL
            JOIN job_applications a ON a.id = i.application_id AND a.deleted_at IS NULL
            LEFT JOIN email_preferences p ON p.user_id = i.user_id
            WHERE i.deleted_at IS NULL
              AND i.reminder_sent_at IS NULL
              AND i.outcome = 'PENDING'
              AND COALESCE(p.interview_reminders, TRUE)
              AND i.scheduled_at > NOW()
              AND i.scheduled_at <= NOW() + make_interval(hours => COALESCE(p.reminder_lead_hours, 24))
            ORDER BY i.scheduled_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn mark_reminded(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE interviews SET reminder_sent_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }
}
