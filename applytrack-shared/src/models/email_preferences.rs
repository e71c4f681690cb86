/// Per-user email notification settings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

/// Default reminder lead time in hours
pub const DEFAULT_LEAD_HOURS: i32 = 24;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailPreferences {
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub interview_reminders: bool,
    pub task_reminders: bool,
    pub weekly_digest: bool,
    /// How far ahead reminders are sent, 1..=168 hours
    pub reminder_lead_hours: i32,
    pub updated_at: DateTime<Utc>,
}

/// Full replacement of the settings
#[derive(Debug, Clone, Copy)]
pub struct UpdateEmailPreferences {
    pub interview_reminders: bool,
    pub task_reminders: bool,
    pub weekly_digest: bool,
    pub reminder_lead_hours: i32,
}

impl EmailPreferences {
    /// Inserts the defaults for a new user
    pub async fn create_default<'e, E>(executor: E, user_id: Uuid) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query("INSERT INTO email_preferences (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(executor)
            .await?;

        Ok(())
    }

    /// Loads the settings, creating defaults for users that predate them
    pub async fn get(pool: &PgPool, user_id: Uuid) -> Result<Self, sqlx::Error> {
        Self::create_default(pool, user_id).await?;

        sqlx::query_as::<_, EmailPreferences>(
            r#"
            SELECT user_id, interview_reminders, task_reminders, weekly_digest,
                   reminder_lead_hours, updated_at
            FROM email_preferences
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
    }

    pub async fn upsert(
        pool: &PgPool,
        user_id: Uuid,
        data: UpdateEmailPreferences,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, EmailPreferences>(
            r#"
            INSERT INTO email_preferences
                (user_id, interview_reminders, task_reminders, weekly_digest, reminder_lead_hours)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE
            SET interview_reminders = EXCLUDED.interview_reminders,
                task_reminders = EXCLUDED.task_reminders,
                weekly_digest = EXCLUDED.weekly_digest,
                reminder_lead_hours = EXCLUDED.reminder_lead_hours,
                updated_at = NOW()
            RETURNING user_id, interview_reminders, task_reminders, weekly_digest,
                      reminder_lead_hours, updated_at
            "#,
        )
        .bind(user_id)
        .bind(data.interview_reminders)
        .bind(data.task_reminders)
        .bind(data.weekly_digest)
        .bind(data.reminder_lead_hours)
        .fetch_one(pool)
        .await
    }
}
